//! Replaying the schedule log from empty must reproduce the live state.

use potd_relay::schedule::ScheduleStore;

#[tokio::test]
async fn replay_matches_live_state_after_mixed_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");

    let live_state = {
        let store = ScheduleStore::open(&path).await.unwrap();

        store.set("chan1", 14).await.unwrap();
        store.set("chan2", 7).await.unwrap();
        store.set("chan1", 9).await.unwrap();
        store.sent("chan1", "2024-01-01").await.unwrap();
        store.remove("chan2").await.unwrap();
        store.set("chan3", 23).await.unwrap();
        store.sent("chan3", "2024-01-02").await.unwrap();
        store.remove("missing").await.unwrap();
        store.remove_if(|channel, hour| channel == "chan3" && hour == 23)
            .await
            .unwrap();

        store.snapshot().await
    };

    let reloaded = ScheduleStore::open(&path).await.unwrap();
    assert_eq!(reloaded.snapshot().await, live_state);
}

#[tokio::test]
async fn second_set_overwrites_and_sent_is_tracked() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");

    {
        let store = ScheduleStore::open(&path).await.unwrap();
        store.set("chan1", 14).await.unwrap();
        store.set("chan1", 9).await.unwrap();
        store.sent("chan1", "2024-01-01").await.unwrap();
    }

    let store = ScheduleStore::open(&path).await.unwrap();
    let state = store.snapshot().await;
    assert_eq!(state.hour_for("chan1"), Some(9));
    assert_eq!(state.last_sent("chan1"), Some("2024-01-01"));
    assert_eq!(state.len(), 1);
}

#[tokio::test]
async fn pruning_survives_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");

    {
        let store = ScheduleStore::open(&path).await.unwrap();
        store.set("chan1", 9).await.unwrap();
        store.set("chan2", 9).await.unwrap();
        store.remove_if(|channel, _| channel == "chan2").await.unwrap();
    }

    let store = ScheduleStore::open(&path).await.unwrap();
    let state = store.snapshot().await;
    assert_eq!(state.hour_for("chan1"), Some(9));
    assert_eq!(state.hour_for("chan2"), None);
}
