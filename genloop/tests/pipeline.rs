//! Config → controller → sampler → batch, wired together the way a host
//! application would.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use genloop::prelude::*;
use genloop::{FixedDevice, HistoryStore, RecordingPause, load_from_str};

fn config_toml(history_file: &Path, memory_enabled: bool) -> String {
    format!(
        r#"
fallback_resolutions = [{{ width = 896, height = 896 }}, {{ width = 768, height = 768 }}]

[memory]
enabled = {memory_enabled}
safe_mode = false
max_retries = 3
recovery_delay_ms = 250

[generation]
width = 1024
height = 1024

[sampler]
history_file = "{history}"
default_window = 2

[batch]
inter_genre_pause_ms = 5000
"#,
        history = history_file.display(),
    )
}

fn load(history_file: &Path, memory_enabled: bool) -> GenloopConfig {
    let env: HashMap<String, String> = HashMap::new();
    let toml = config_toml(history_file, memory_enabled);
    let loaded = load_from_str(
        Some(toml.as_str()),
        None,
        &env,
        Path::new("/nonexistent-home"),
    )
    .expect("config loads");
    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    loaded.config
}

fn genres() -> Vec<String> {
    vec!["portrait".to_owned(), "landscape".to_owned()]
}

#[test]
fn batch_recovers_from_exhaustion_and_persists_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let history_file = dir.path().join("state").join("history.json");
    let config = load(&history_file, true);

    let device = Arc::new(FixedDevice::new(10, 100));
    let pause = Arc::new(RecordingPause::new());
    let mut controller =
        RetryController::from_config(&config, device, pause.clone()).expect("controller");
    let mut sampler = WeightedNoRepeatSampler::from_config(&config.sampler);
    let runner = BatchRunner::new(config.batch.clone());

    let plan = runner.plan(4, &genres());
    assert_eq!(plan.iter().map(|(_, n)| n).sum::<usize>(), 4);

    let poses = ["standing", "sitting", "kneeling"];
    let mut failed_once = false;
    let mut resolutions = Vec::new();
    let summaries = runner.run_plan(&mut controller, &plan, |genre, index, resolution| {
        if genre == "landscape" && index == 0 && !failed_once {
            failed_once = true;
            return Err(GenError::resource_exhausted("render", "out of memory"));
        }
        resolutions.push(resolution);
        sampler.select(&poses, genre, config.sampler.window_for(genre))?;
        Ok(())
    });

    assert_eq!(summaries.len(), 2);
    assert!(summaries.iter().all(|s| s.is_complete()));
    assert_eq!(controller.ladder().current_rung(), Some(0));
    assert_eq!(resolutions[0], Resolution::new(1024, 1024));
    assert_eq!(*resolutions.last().expect("resolutions"), Resolution::new(896, 896));
    assert!(pause.requested().contains(&Duration::from_millis(5000)));
    assert!(pause.requested().contains(&Duration::from_millis(250)));

    let history = HistoryStore::new(&history_file).load();
    let selections: u64 = history
        .counters
        .values()
        .flat_map(|counts| counts.values())
        .sum();
    assert_eq!(selections, 4);
    assert!(history.histories.values().all(|recent| recent.len() <= 2));
}

#[test]
fn failing_genre_stops_early_but_later_genres_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir.path().join("history.json"), true);
    let mut controller = RetryController::from_config(
        &config,
        Arc::new(FixedDevice::new(10, 100)),
        Arc::new(RecordingPause::new()),
    )
    .expect("controller");
    let runner = BatchRunner::new(config.batch.clone());
    let plan = vec![("portrait".to_owned(), 3), ("landscape".to_owned(), 2)];

    let summaries = runner.run_plan(&mut controller, &plan, |genre, index, _| {
        if genre == "portrait" && index == 1 {
            Err(GenError::backend("upload", "connection reset"))
        } else {
            Ok(())
        }
    });

    assert_eq!(summaries[0].succeeded, 1);
    assert!(matches!(summaries[0].failure, Some(GenError::Backend { .. })));
    assert!(summaries[1].is_complete());
}

#[test]
fn disabled_memory_management_skips_inter_genre_cleanup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir.path().join("history.json"), false);
    let pause = Arc::new(RecordingPause::new());
    let mut controller =
        RetryController::from_config(&config, Arc::new(FixedDevice::new(99, 100)), pause.clone())
            .expect("controller");
    let runner = BatchRunner::new(config.batch.clone());

    let summaries = runner.run_plan(&mut controller, &runner.plan(2, &genres()), |_, _, _| Ok(()));

    assert!(summaries.iter().all(|s| s.is_complete()));
    // one post-success cleanup per item, none between genres
    assert_eq!(controller.monitor().cleanup_count(), 2);
    assert!(!pause.requested().contains(&Duration::from_millis(5000)));
    assert_eq!(controller.ladder().current_rung(), None);
}

#[test]
fn item_pool_cycles_through_scanned_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in ["a.png", "b.JPG", "c.webp", "skip.txt"] {
        std::fs::write(dir.path().join(name), b"").expect("write");
    }
    let config = GenloopConfig::default();
    let mut pool = ItemPool::from_directory(dir.path(), &config.pool.extensions).expect("scan");
    assert_eq!(pool.len(), 3);

    let mut drawn: Vec<String> = (0..3)
        .map(|_| pool.next_item().expect("draw").to_owned())
        .collect();
    drawn.sort();
    drawn.dedup();
    assert_eq!(drawn.len(), 3);
    assert_eq!(pool.stats().cycle_progress(), "3/3");
}
