//! End-to-end scenarios against the public API
//!
//! Every test drives a real `DownloadManager` with a scripted fetcher under a paused
//! tokio clock, so retry waits complete instantly in wall time while staying exact
//! in virtual time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    PAGE_BYTES, ScriptedFetcher, WAIT, chapter, collect_events_until, collect_lifecycle,
    progress_trace, scenario_config,
};
use comic_dl::{
    AbandonReason, Config, DownloadManager, Error, Event, FailureKind, FetchError, ProgressBoard,
    TaskState,
};

#[tokio::test(start_paused = true)]
async fn chapter_with_three_pages_succeeds() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let manager = DownloadManager::new(scenario_config(3), fetcher.clone())
        .await
        .unwrap();
    let mut events = manager.subscribe();

    manager.submit("ch-1", chapter("ch-1", 3)).await.unwrap();
    let events = collect_lifecycle(&mut events, "ch-1").await;

    assert_eq!(
        progress_trace(&events),
        vec![
            ("created", 0, 3),
            ("updated", 1, 3),
            ("updated", 2, 3),
            ("updated", 3, 3),
            ("succeeded", 3, 3),
        ]
    );
    let done = events.last().unwrap().snapshot().unwrap();
    assert_eq!(done.downloaded_bytes, 3 * PAGE_BYTES);
    assert_eq!(fetcher.fetches("ch-1"), 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_page_waits_for_server_hint() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script(
        "ch-2",
        "001",
        vec![Err(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        })],
    );
    let manager = DownloadManager::new(scenario_config(3), fetcher.clone())
        .await
        .unwrap();
    let mut events = manager.subscribe();

    manager.submit("ch-2", chapter("ch-2", 1)).await.unwrap();
    let events = collect_lifecycle(&mut events, "ch-2").await;

    assert_eq!(
        progress_trace(&events),
        vec![
            ("created", 0, 1),
            ("retrying", 0, 1),
            ("updated", 1, 1),
            ("succeeded", 1, 1),
        ]
    );
    assert!(matches!(events[1], Event::Retrying { wait_secs: 5, .. }));
    assert_eq!(fetcher.fetches("ch-2"), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_queued_chapter_never_runs() {
    let fetcher = Arc::new(ScriptedFetcher::with_latency(Duration::from_secs(2)));
    let manager = DownloadManager::new(scenario_config(1), fetcher.clone())
        .await
        .unwrap();
    let mut events = manager.subscribe();

    manager.submit("ch-1", chapter("ch-1", 2)).await.unwrap();
    manager.submit("ch-2", chapter("ch-2", 2)).await.unwrap();
    manager.cancel("ch-2").await.unwrap();

    let ch2 = collect_lifecycle(&mut events, "ch-2").await;
    assert_eq!(progress_trace(&ch2), vec![("created", 0, 2), ("removed", 0, 0)]);

    let ch1 = collect_lifecycle(&mut events, "ch-1").await;
    assert!(matches!(ch1.last(), Some(Event::Succeeded { .. })));
    assert_eq!(fetcher.fetches("ch-2"), 0);
}

#[tokio::test(start_paused = true)]
async fn double_submit_runs_a_single_task() {
    let fetcher = Arc::new(ScriptedFetcher::with_latency(Duration::from_secs(1)));
    let manager = DownloadManager::new(scenario_config(3), fetcher.clone())
        .await
        .unwrap();
    let mut events = manager.subscribe();

    manager.submit("ch-1", chapter("ch-1", 2)).await.unwrap();
    let second = manager.submit("ch-1", chapter("ch-1", 2)).await;
    assert!(matches!(second, Err(Error::AlreadyActive { .. })));

    collect_lifecycle(&mut events, "ch-1").await;
    assert_eq!(fetcher.fetches("ch-1"), 2);
}

#[tokio::test(start_paused = true)]
async fn never_more_than_k_chapters_download_at_once() {
    let fetcher = Arc::new(ScriptedFetcher::with_latency(Duration::from_millis(500)));
    let manager = DownloadManager::new(scenario_config(3), fetcher.clone())
        .await
        .unwrap();
    let mut events = manager.subscribe();

    for n in 0..8 {
        let key = format!("ch-{n}");
        manager.submit(key.as_str(), chapter(&key, 3)).await.unwrap();
    }

    // Track the running set purely from events
    let mut board = ProgressBoard::new();
    let mut finished = 0;
    let result = tokio::time::timeout(WAIT, async {
        while finished < 8 {
            let Some(event) = events.recv().await else {
                break;
            };
            board.apply(&event);
            if event.is_terminal() {
                finished += 1;
            }
            let running = board
                .uncompleted()
                .iter()
                .filter(|s| s.state == TaskState::Running)
                .count();
            assert!(running <= 3, "{running} tasks running at once");
        }
    })
    .await;
    assert!(result.is_ok());

    assert_eq!(board.completed().len(), 8);
    assert_eq!(fetcher.peak_concurrency(), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_and_exhausted_failures_are_distinguished() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script("gone", "001", vec![Err(FetchError::NotFound)]);
    fetcher.script(
        "flaky",
        "001",
        (0..5).map(|_| Err(FetchError::Timeout)).collect(),
    );
    let manager = DownloadManager::new(scenario_config(2), fetcher.clone())
        .await
        .unwrap();
    // One feed per task, since collecting one task's events skips the other's
    let mut gone_events = manager.subscribe();
    let mut flaky_events = manager.subscribe();

    manager.submit("gone", chapter("gone", 2)).await.unwrap();
    manager.submit("flaky", chapter("flaky", 2)).await.unwrap();

    let gone = collect_lifecycle(&mut gone_events, "gone").await;
    assert!(matches!(
        gone.last(),
        Some(Event::Failed {
            reason: AbandonReason::Permanent {
                kind: FailureKind::NotFound
            },
            ..
        })
    ));
    assert_eq!(fetcher.fetches("gone"), 1);

    let flaky = collect_lifecycle(&mut flaky_events, "flaky").await;
    let waits: Vec<u64> = flaky
        .iter()
        .filter_map(|e| match e {
            Event::Retrying { wait_secs, .. } => Some(*wait_secs),
            _ => None,
        })
        .collect();
    // Default policy: 5 attempts, 1s doubling, no jitter
    assert_eq!(waits, vec![1, 2, 4, 8]);
    assert!(matches!(
        flaky.last(),
        Some(Event::Failed {
            reason: AbandonReason::RetriesExhausted {
                last: FailureKind::Timeout
            },
            ..
        })
    ));
    assert_eq!(fetcher.fetches("flaky"), 5);

    let completed = manager.list_completed().await;
    assert_eq!(completed.len(), 2);
    assert!(completed.iter().all(|s| s.state == TaskState::Abandoned));
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_keep_progress() {
    let fetcher = Arc::new(ScriptedFetcher::with_latency(Duration::from_secs(1)));
    let manager = DownloadManager::new(scenario_config(1), fetcher.clone())
        .await
        .unwrap();
    let mut events = manager.subscribe();

    manager.submit("ch-1", chapter("ch-1", 4)).await.unwrap();
    collect_events_until(&mut events, "ch-1", |e| {
        e.snapshot().is_some_and(|s| s.completed_units == 2)
    })
    .await;

    manager.pause("ch-1").await.unwrap();
    let paused = collect_events_until(&mut events, "ch-1", |e| {
        matches!(e, Event::Paused { .. })
    })
    .await;
    let at_pause = paused.last().unwrap().snapshot().unwrap().completed_units;
    assert!(at_pause >= 2);

    manager.resume("ch-1").await.unwrap();
    let rest = collect_lifecycle(&mut events, "ch-1").await;

    let mut last = 0.0;
    for snapshot in rest.iter().filter_map(Event::snapshot) {
        assert!(snapshot.completed_units >= at_pause);
        assert!(snapshot.percentage >= last);
        last = snapshot.percentage;
    }
    assert_eq!(last, 100.0);
    assert_eq!(fetcher.fetches("ch-1"), 4);
}

#[tokio::test(start_paused = true)]
async fn progress_board_matches_manager_lists() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.script("ch-3", "001", vec![Err(FetchError::Banned)]);
    let manager = DownloadManager::new(scenario_config(2), fetcher)
        .await
        .unwrap();
    let mut events = manager.subscribe();
    let mut board = ProgressBoard::new();

    for key in ["ch-1", "ch-2", "ch-3"] {
        manager.submit(key, chapter(key, 2)).await.unwrap();
    }

    let mut terminal = 0;
    while terminal < 3 {
        let event = events.recv().await.unwrap();
        board.apply(&event);
        if event.is_terminal() {
            terminal += 1;
        }
    }

    let from_board: Vec<_> = board.completed().into_iter().cloned().collect();
    assert_eq!(from_board, manager.list_completed().await);
    assert!(board.uncompleted().is_empty());
    assert!(manager.list_active().await.is_empty());

    // Removing from the manager is silent; the board forgets explicitly
    manager.remove("ch-1").await.unwrap();
    board.forget(&"ch-1".into());
    let keys: Vec<_> = board
        .completed()
        .into_iter()
        .map(|s| s.key.to_string())
        .collect();
    assert_eq!(keys, vec!["ch-2", "ch-3"]);
}

#[tokio::test]
async fn manager_can_be_built_from_json_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(
        &mut file,
        br#"{ "max_concurrent_tasks": 1, "speed_report_interval": null, "retry": { "jitter": false } }"#,
    )
    .unwrap();

    let config = Config::from_json_file(file.path()).unwrap();
    assert_eq!(config.max_concurrent_tasks(), 1);

    let manager = DownloadManager::new(config, Arc::new(ScriptedFetcher::new()))
        .await
        .unwrap();
    let mut events = manager.subscribe();
    manager.submit("ch-1", chapter("ch-1", 1)).await.unwrap();
    let events = collect_lifecycle(&mut events, "ch-1").await;
    assert!(matches!(events.last(), Some(Event::Succeeded { .. })));

    manager.shutdown().await.unwrap();
}
