//! End-to-end watcher lifecycle tests over a scripted browser.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use rust_decimal::Decimal;
use ticker_watch::{EnsureOutcome, SupervisorError, WatcherState};

use common::{
    ScriptedDriver, assert_quiet, fast_config, harness, harness_with, next_update, sym, wait_until,
};

const QUIET: Duration = Duration::from_millis(150);

#[tokio::test]
async fn publishes_only_price_changes() {
    let h = harness(ScriptedDriver::new().script("BTCUSDT", &["100", "100", "101"]));
    let mut stream = h.service.stream_prices(&["BTCUSDT"]).unwrap();

    h.service.add_ticker("btcusdt").unwrap();

    let first = next_update(&mut stream).await;
    assert_eq!(first.ticker, sym("BTCUSDT"));
    assert_eq!(first.price, Decimal::from(100));

    let second = next_update(&mut stream).await;
    assert_eq!(second.price, Decimal::from(101));
    assert!(second.timestamp >= first.timestamp);

    assert_quiet(&mut stream, QUIET).await;
}

#[tokio::test]
async fn late_subscriber_is_primed_with_latest_price() {
    let h = harness(ScriptedDriver::new().script("SOLUSDT", &["42.5"]));
    let mut early = h.service.stream_prices(&["SOLUSDT"]).unwrap();
    h.service.add_ticker("SOLUSDT").unwrap();
    assert_eq!(next_update(&mut early).await.price, Decimal::new(425, 1));

    let mut late = h.service.stream_prices(&["solusdt"]).unwrap();
    assert_eq!(next_update(&mut late).await.price, Decimal::new(425, 1));
    assert_quiet(&mut late, QUIET).await;
}

#[tokio::test]
async fn remove_then_add_never_overlaps_pages() {
    let h = harness(
        ScriptedDriver::new()
            .script("ETHUSDT", &["3000"])
            .close_delay(Duration::from_millis(50)),
    );
    let eth = sym("ETHUSDT");

    h.service.add_ticker("ETHUSDT").unwrap();
    wait_until("ETH running", || h.supervisor().state(&eth) == WatcherState::Running).await;

    h.service.remove_ticker("ETHUSDT").unwrap();
    assert_eq!(h.supervisor().state(&eth), WatcherState::Stopping);
    h.service.add_ticker("ETHUSDT").unwrap();

    wait_until("second ETH page", || h.driver.open_calls("ETHUSDT") == 2).await;
    wait_until("ETH running again", || {
        h.supervisor().state(&eth) == WatcherState::Running
    })
    .await;

    assert_eq!(h.driver.max_open_pages_for("ETHUSDT"), 1);
    assert_eq!(h.driver.open_pages_for("ETHUSDT"), 1);
    assert_eq!(h.service.list_tickers(), vec![eth]);
}

#[tokio::test]
async fn invalid_ticker_stays_listed_but_silent() {
    let h = harness(ScriptedDriver::new().invalid("NOPE"));
    let mut stream = h.service.stream_prices(&["NOPE"]).unwrap();

    let listed = h.service.add_ticker("nope").unwrap();
    assert_eq!(listed, vec![sym("NOPE")]);

    wait_until("page opened", || h.driver.open_calls("NOPE") == 1).await;
    wait_until("page released", || h.driver.open_pages() == 0).await;
    wait_until("browser closed", || !h.browser.status().live).await;

    assert_eq!(h.supervisor().state(&sym("NOPE")), WatcherState::Absent);
    assert_eq!(h.service.list_tickers(), vec![sym("NOPE")]);
    assert_quiet(&mut stream, QUIET).await;
}

#[tokio::test]
async fn browser_closes_after_last_watcher() {
    let h = harness(
        ScriptedDriver::new()
            .script("AAA", &["1"])
            .script("BBB", &["2"]),
    );

    h.service.add_ticker("AAA").unwrap();
    h.service.add_ticker("BBB").unwrap();
    wait_until("both running", || {
        h.supervisor().state(&sym("AAA")) == WatcherState::Running
            && h.supervisor().state(&sym("BBB")) == WatcherState::Running
    })
    .await;
    assert_eq!(h.driver.sessions_created(), 1);
    assert_eq!(h.browser.status().open_pages, 2);

    h.service.remove_ticker("AAA").unwrap();
    wait_until("AAA gone", || h.driver.open_pages_for("AAA") == 0).await;
    assert!(h.driver.session_live());

    h.service.remove_ticker("BBB").unwrap();
    wait_until("session closed", || !h.driver.session_live()).await;
    assert_eq!(h.driver.sessions_closed(), 1);
    assert_eq!(h.browser.status().open_pages, 0);
}

#[tokio::test]
async fn crashed_browser_session_is_replaced() {
    let h = harness(
        ScriptedDriver::new()
            .script("AAA", &["1"])
            .script("BBB", &["5"]),
    );
    let mut stream = h.service.stream_prices(&["AAA"]).unwrap();
    h.service.add_ticker("AAA").unwrap();
    h.service.add_ticker("BBB").unwrap();
    assert_eq!(next_update(&mut stream).await.price, Decimal::from(1));
    wait_until("both running", || h.driver.open_pages() == 2).await;

    h.driver.crash_session();

    wait_until("both pages reopened", || {
        h.driver.session_live()
            && h.driver.open_pages() == 2
            && h.browser.status().open_pages == 2
    })
    .await;
    assert_eq!(h.driver.sessions_created(), 2);
    assert_eq!(h.driver.open_calls("AAA"), 2);
    assert_eq!(h.driver.open_calls("BBB"), 2);
    assert_eq!(h.supervisor().state(&sym("AAA")), WatcherState::Running);
    // Same price on the new page is not a change.
    assert_quiet(&mut stream, QUIET).await;
}

#[tokio::test]
async fn browser_relaunches_on_next_add() {
    let h = harness(ScriptedDriver::new().script("AAA", &["1"]));

    h.service.add_ticker("AAA").unwrap();
    wait_until("running", || h.supervisor().state(&sym("AAA")) == WatcherState::Running).await;
    h.service.remove_ticker("AAA").unwrap();
    wait_until("session closed", || !h.driver.session_live()).await;

    h.service.add_ticker("AAA").unwrap();
    wait_until("running again", || {
        h.supervisor().state(&sym("AAA")) == WatcherState::Running
    })
    .await;
    assert_eq!(h.driver.sessions_created(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn add_remove_storm_settles_consistently() {
    let h = harness(
        ScriptedDriver::new()
            .script("AAA", &["1"])
            .script("BBB", &["2"])
            .script("CCC", &["3"])
            .open_delay(Duration::from_millis(2)),
    );

    let mut tasks = Vec::new();
    for worker in 0..4_usize {
        let service = h.service.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..25_usize {
                let ticker = ["AAA", "BBB", "CCC"][(worker + round) % 3];
                if (worker + round) % 2 == 0 {
                    service.add_ticker(ticker).unwrap();
                } else {
                    service.remove_ticker(ticker).unwrap();
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    h.service.add_ticker("AAA").unwrap();
    h.service.add_ticker("BBB").unwrap();
    h.service.remove_ticker("CCC").unwrap();

    wait_until("watchers match registry", || {
        h.supervisor().state(&sym("AAA")) == WatcherState::Running
            && h.supervisor().state(&sym("BBB")) == WatcherState::Running
            && h.supervisor().state(&sym("CCC")) == WatcherState::Absent
            && h.driver.open_pages() == 2
    })
    .await;

    assert_eq!(h.service.list_tickers(), vec![sym("AAA"), sym("BBB")]);
    for ticker in ["AAA", "BBB", "CCC"] {
        assert!(h.driver.max_open_pages_for(ticker) <= 1, "{ticker} overlapped");
    }
}

#[tokio::test]
async fn every_subscriber_receives_the_full_stream() {
    let h = harness(ScriptedDriver::new().script("XRP", &["1", "2", "3"]));
    let mut first = h.service.stream_prices(&["XRP"]).unwrap();
    let mut second = h.service.stream_prices::<&str>(&[]).unwrap();

    h.service.add_ticker("XRP").unwrap();

    for stream in [&mut first, &mut second] {
        let prices = [
            next_update(stream).await.price,
            next_update(stream).await.price,
            next_update(stream).await.price,
        ];
        assert_eq!(prices, [Decimal::from(1), Decimal::from(2), Decimal::from(3)]);
    }
}

#[tokio::test]
async fn dropping_one_stream_leaves_others_running() {
    let h = harness(ScriptedDriver::new().script("DOGE", &["1", "2", "3", "4"]));
    let mut kept = h.service.stream_prices(&["DOGE"]).unwrap();
    let dropped = h.service.stream_prices(&["DOGE"]).unwrap();
    assert_eq!(h.hub.subscriber_count(), 2);

    h.service.add_ticker("DOGE").unwrap();
    assert_eq!(next_update(&mut kept).await.price, Decimal::from(1));

    drop(dropped);
    assert_eq!(h.hub.subscriber_count(), 1);

    assert_eq!(next_update(&mut kept).await.price, Decimal::from(2));
    assert_eq!(h.supervisor().state(&sym("DOGE")), WatcherState::Running);
    assert_eq!(h.service.list_tickers(), vec![sym("DOGE")]);
}

#[tokio::test]
async fn restart_times_out_when_previous_watcher_hangs() {
    let mut config = fast_config();
    config.restart_wait_timeout = Duration::from_millis(100);
    let h = harness_with(
        ScriptedDriver::new()
            .script("LTC", &["70"])
            .close_delay(Duration::from_secs(1)),
        config,
    );
    let ltc = sym("LTC");

    h.service.add_ticker("LTC").unwrap();
    wait_until("running", || h.supervisor().state(&ltc) == WatcherState::Running).await;
    h.service.remove_ticker("LTC").unwrap();

    h.service.registry().add(ltc.clone());
    let err = h.supervisor().ensure_watcher(ltc.clone()).await.unwrap_err();
    assert!(matches!(err, SupervisorError::RestartTimeout { ref ticker, .. } if *ticker == ltc));

    // Once the old page is closed a retry succeeds.
    wait_until("old watcher gone", || h.supervisor().state(&ltc) == WatcherState::Absent).await;
    assert_eq!(
        h.supervisor().ensure_watcher(ltc.clone()).await.unwrap(),
        EnsureOutcome::Started
    );
    assert_eq!(h.driver.max_open_pages_for("LTC"), 1);
}

#[tokio::test]
async fn re_add_recovers_after_slow_stop() {
    let mut config = fast_config();
    config.restart_wait_timeout = Duration::from_millis(100);
    let h = harness_with(
        ScriptedDriver::new()
            .script("LTC", &["70"])
            .close_delay(Duration::from_millis(400)),
        config,
    );
    let ltc = sym("LTC");

    h.service.add_ticker("LTC").unwrap();
    wait_until("running", || h.supervisor().state(&ltc) == WatcherState::Running).await;
    h.service.remove_ticker("LTC").unwrap();
    h.service.add_ticker("LTC").unwrap();

    // The first restart attempt times out while the old page is closing.
    wait_until("watcher restarted", || {
        h.supervisor().state(&ltc) == WatcherState::Running
    })
    .await;
    assert_eq!(h.service.list_tickers(), vec![ltc.clone()]);
    assert_eq!(h.driver.open_calls("LTC"), 2);
    assert_eq!(h.driver.max_open_pages_for("LTC"), 1);
}

#[tokio::test]
async fn restart_retries_stop_once_ticker_is_removed() {
    let mut config = fast_config();
    config.restart_wait_timeout = Duration::from_millis(100);
    let h = harness_with(
        ScriptedDriver::new()
            .script("XRP", &["1"])
            .close_delay(Duration::from_millis(400)),
        config,
    );
    let xrp = sym("XRP");

    h.service.add_ticker("XRP").unwrap();
    wait_until("running", || h.supervisor().state(&xrp) == WatcherState::Running).await;
    h.service.remove_ticker("XRP").unwrap();
    let retry = h.supervisor().spawn_ensure(xrp.clone());
    h.service.registry().add(xrp.clone());
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.service.registry().remove(&xrp);

    tokio::time::timeout(Duration::from_secs(2), retry)
        .await
        .unwrap()
        .unwrap();
    wait_until("old watcher gone", || h.supervisor().state(&xrp) == WatcherState::Absent).await;
    assert_eq!(h.driver.open_calls("XRP"), 1);
}

#[tokio::test]
async fn removed_ticker_is_not_restarted() {
    let h = harness(ScriptedDriver::new().script("ADA", &["1"]));
    assert_eq!(
        h.supervisor().ensure_watcher(sym("ADA")).await.unwrap(),
        EnsureOutcome::NotRequested
    );
    assert_eq!(h.driver.sessions_created(), 0);
}

#[tokio::test]
async fn shutdown_stops_every_watcher() {
    let h = harness(
        ScriptedDriver::new()
            .script("AAA", &["1"])
            .script("BBB", &["2"]),
    );
    h.service.add_ticker("AAA").unwrap();
    h.service.add_ticker("BBB").unwrap();
    wait_until("both running", || h.driver.open_pages() == 2).await;

    assert!(h.supervisor().shutdown(Duration::from_secs(2)).await);
    assert!(!h.driver.session_live());

    // Refused after shutdown even though still requested.
    assert_eq!(
        h.supervisor().ensure_watcher(sym("AAA")).await.unwrap(),
        EnsureOutcome::NotRequested
    );
    assert_eq!(h.hub.latest(&sym("AAA")), None);
}

#[tokio::test]
async fn shutdown_timeout_closes_browser_under_stuck_watchers() {
    let h = harness(
        ScriptedDriver::new()
            .script("DOT", &["5"])
            .close_delay(Duration::from_secs(1)),
    );
    h.service.add_ticker("DOT").unwrap();
    wait_until("running", || h.supervisor().state(&sym("DOT")) == WatcherState::Running).await;

    assert!(!h.supervisor().shutdown(Duration::from_millis(100)).await);
    assert!(!h.driver.session_live());
    assert_eq!(h.browser.status().open_pages, 0);

    // The straggler's late release must not disturb the closed browser.
    wait_until("straggler gone", || h.supervisor().state(&sym("DOT")) == WatcherState::Absent).await;
    let status = h.browser.status();
    assert!(!status.live);
    assert_eq!(status.open_pages, 0);
    assert_eq!(h.driver.sessions_created(), 1);
}
