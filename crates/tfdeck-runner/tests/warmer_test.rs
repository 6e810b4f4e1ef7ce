//! 偽の terraform バイナリを使ったプロバイダーキャッシュのウォームアップテスト

#![cfg(unix)]

mod common;

use common::{Fixture, sentinel_result};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tfdeck_runner::{CacheState, ProcessRunner, ProviderCacheWarmer, RunOptions};

async fn ready_within(warmer: &ProviderCacheWarmer) {
    tokio::time::timeout(Duration::from_secs(20), warmer.await_ready())
        .await
        .expect("warmer never became ready");
}

fn warmup_count(fixture: &Fixture) -> usize {
    fixture
        .invocations()
        .iter()
        .filter(|line| line.as_str() == "init -no-color -input=false -backend=false")
        .count()
}

#[tokio::test]
async fn test_start_twice_spawns_once() {
    let fixture = Fixture::new();
    let warmer = Arc::new(ProviderCacheWarmer::new(
        fixture.runner(&[]),
        &fixture.settings(),
    ));

    assert!(warmer.start());
    assert!(!warmer.start());
    ready_within(&warmer).await;
    assert!(!warmer.start());

    let status = warmer.status();
    assert_eq!(status.state, CacheState::Ready);
    assert!(status.ready);
    assert_eq!(status.progress, 100);
    assert_eq!(status.message, "Provider cache ready");
    assert_eq!(status.error, None);
    assert_eq!(warmup_count(&fixture), 1);
    assert!(warmer.provider_cache_path().join("5.31.0").is_dir());
}

#[tokio::test]
async fn test_populated_cache_is_ready_immediately() {
    let fixture = Fixture::new();
    std::fs::create_dir_all(
        fixture
            .cache_dir
            .join("registry.terraform.io/hashicorp/aws/5.0.0"),
    )
    .unwrap();
    let warmer = Arc::new(ProviderCacheWarmer::new(
        fixture.runner(&[]),
        &fixture.settings(),
    ));

    assert!(warmer.start());
    let status = warmer.status();
    assert!(status.ready);
    assert_eq!(status.progress, 100);
    assert!(!warmer.is_warming());
    assert!(fixture.invocations().is_empty());
}

#[tokio::test]
async fn test_failed_warmup_still_releases_waiters() {
    let fixture = Fixture::new();
    let warmer = Arc::new(ProviderCacheWarmer::new(
        fixture.runner(&[("FAKE_TF_WARMUP_FAIL", "1")]),
        &fixture.settings(),
    ));

    warmer.start();
    ready_within(&warmer).await;

    let status = warmer.status();
    assert!(status.ready);
    assert_eq!(status.progress, 100);
    assert!(status.message.contains("failed"));
    assert!(status.error.is_some());
}

/// init が SIGKILL で落ちても待機側が解放されることを確認
#[tokio::test]
async fn test_killed_warmup_still_releases_waiters() {
    let fixture = Fixture::new();
    let warmer = Arc::new(ProviderCacheWarmer::new(
        fixture.runner(&[("FAKE_TF_WARMUP_KILL", "1")]),
        &fixture.settings(),
    ));

    warmer.start();
    ready_within(&warmer).await;

    let status = warmer.status();
    assert!(status.ready);
    assert_eq!(status.state, CacheState::Ready);
    assert_eq!(status.progress, 100);
    assert!(status.error.is_some());
    assert_eq!(warmup_count(&fixture), 1);
}

#[tokio::test]
async fn test_missing_binary_still_releases_waiters() {
    let fixture = Fixture::new();
    let warmer = Arc::new(ProviderCacheWarmer::new(
        ProcessRunner::new("/nonexistent/bin/terraform"),
        &fixture.settings(),
    ));

    warmer.start();
    ready_within(&warmer).await;

    let status = warmer.status();
    assert!(status.ready);
    assert!(status.message.starts_with("Provider cache warmup failed: Failed to start"));
}

#[tokio::test]
async fn test_scratch_directory_is_removed() {
    let fixture = Fixture::new();
    let scratch_parent = fixture.temp.path().join("scratch");
    std::fs::create_dir_all(&scratch_parent).unwrap();

    // 失敗するダウンロード、続いて成功するダウンロード
    for knobs in [&[("FAKE_TF_WARMUP_FAIL", "1")][..], &[][..]] {
        let warmer = Arc::new(
            ProviderCacheWarmer::new(fixture.runner(knobs), &fixture.settings())
                .with_scratch_parent(&scratch_parent),
        );
        warmer.start();
        ready_within(&warmer).await;

        let leftovers = std::fs::read_dir(&scratch_parent).unwrap().count();
        assert_eq!(leftovers, 0);
    }
    assert_eq!(warmup_count(&fixture), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_plan_relays_warmup_progress() {
    let fixture = Fixture::new();
    let dir = fixture.add_instance("ec2-web", "ec2");
    let orchestrator = fixture.orchestrator_with(&[("FAKE_TF_INIT_SLEEP", "1")]);

    assert!(orchestrator.start_warmup());
    assert!(orchestrator.warmer().is_warming());

    let lines: Vec<String> = tokio::time::timeout(
        Duration::from_secs(20),
        orchestrator
            .stream_plan("ec2", RunOptions::default())
            .collect(),
    )
    .await
    .unwrap();

    assert!(sentinel_result(&lines));
    let progress: Vec<&String> = lines
        .iter()
        .filter(|l| l.starts_with("Provider cache: "))
        .collect();
    assert!(!progress.is_empty());
    assert_eq!(
        progress.last().unwrap().as_str(),
        "Provider cache: Provider cache ready (100%)\n"
    );
    for pair in progress.windows(2) {
        assert_ne!(pair[0], pair[1]);
    }

    // 進捗 → リソース自身の init → plan の順
    let last_progress = lines
        .iter()
        .rposition(|l| l.starts_with("Provider cache: "))
        .unwrap();
    let planning = lines
        .iter()
        .position(|l| l.starts_with("Planning terraform in: "))
        .unwrap();
    assert!(last_progress < planning);
    assert!(dir.join(".terraform").is_dir());
    assert_eq!(
        fixture.invocations(),
        vec![
            "init -no-color -input=false -backend=false",
            "init -no-color -input=false",
            "plan -no-color -input=false -lock=false -compact-warnings",
        ]
    );
    assert_eq!(orchestrator.cache_status().progress, 100);
}
