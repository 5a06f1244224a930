//! End-to-end repository, sync and restore tests against a local bare remote

mod common;

use assert_matches::assert_matches;
use common::{commit_and_push, git_client, run_git, snapshot_tree, utility, TestEnvironment};
use mac_sync_wizard::config::PullStrategy;
use mac_sync_wizard::git::BranchResolution;
use mac_sync_wizard::notify::Notifier;
use mac_sync_wizard::sync::{CommitStatus, PullStatus};
use mac_sync_wizard::{BackupEngine, SyncEngine, SyncError, SyncOptions};

const REAL: SyncOptions = SyncOptions {
    dry_run: false,
    verbose: false,
    skip_preflight: true,
};

const DRY: SyncOptions = SyncOptions {
    dry_run: true,
    verbose: false,
    skip_preflight: true,
};

fn engine(env: &TestEnvironment, config: mac_sync_wizard::Config) -> SyncEngine {
    SyncEngine::new(config, env.paths.clone())
        .with_git(env.git())
        .with_notifier(Notifier::silent())
}

#[tokio::test]
async fn test_init_on_empty_state_ends_on_branch_and_pushes() {
    let env = TestEnvironment::new();

    let report = env.git().init_repository(&env.remote_url(), "main").await.unwrap();

    assert!(report.created);
    assert!(report.pushed);
    assert_matches!(
        report.resolution,
        BranchResolution::CreatedNew | BranchResolution::AlreadyOn
    );
    let repo = &env.paths.repo_dir;
    assert_eq!(run_git(repo, &["branch", "--show-current"]).trim(), "main");
    for dir in ["backups", "config", "logs"] {
        assert!(repo.join(dir).join(".gitkeep").exists());
    }
    assert!(env.remote_files("main").contains(&"README.md".to_string()));
}

#[tokio::test]
async fn test_second_machine_tracks_existing_remote_branch() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();

    let laptop = env.other_machine("laptop");
    let report = git_client(&laptop.repo_dir)
        .init_repository(&env.remote_url(), "main")
        .await
        .unwrap();

    assert_eq!(report.resolution, BranchResolution::TrackingRemote);
    assert!(laptop.repo_dir.join("README.md").exists());
    assert_eq!(
        run_git(&laptop.repo_dir, &["rev-parse", "--abbrev-ref", "main@{upstream}"]).trim(),
        "origin/main"
    );
    // Both machines share one history
    assert_eq!(
        run_git(&laptop.repo_dir, &["rev-parse", "HEAD"]),
        run_git(&env.paths.repo_dir, &["rev-parse", "HEAD"])
    );
}

#[tokio::test]
async fn test_reconnecting_existing_tree_keeps_branch() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();

    let report = env.git().init_repository(&env.remote_url(), "main").await.unwrap();

    assert!(!report.created);
    assert_eq!(report.resolution, BranchResolution::AlreadyOn);
}

#[tokio::test]
async fn test_rebase_conflict_leaves_no_operation_in_progress() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    let laptop = env.other_machine("laptop");
    git_client(&laptop.repo_dir)
        .init_repository(&env.remote_url(), "main")
        .await
        .unwrap();

    std::fs::write(laptop.repo_dir.join("README.md"), "from the laptop\n").unwrap();
    commit_and_push(&laptop.repo_dir, "Laptop edit");

    let repo = &env.paths.repo_dir;
    std::fs::write(repo.join("README.md"), "from the desktop\n").unwrap();
    run_git(repo, &["commit", "-am", "Desktop edit"]);

    let err = env.git().pull("main", PullStrategy::Rebase).await.unwrap_err();

    assert_matches!(err.downcast_ref::<SyncError>(), Some(SyncError::PullConflict { .. }));
    let git_dir = repo.join(".git");
    assert!(!git_dir.join("rebase-merge").exists());
    assert!(!git_dir.join("rebase-apply").exists());
    assert!(!git_dir.join("MERGE_HEAD").exists());
    assert_eq!(std::fs::read_to_string(repo.join("README.md")).unwrap(), "from the desktop\n");
}

#[tokio::test]
async fn test_pull_stashes_uncommitted_changes() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    let laptop = env.other_machine("laptop");
    git_client(&laptop.repo_dir)
        .init_repository(&env.remote_url(), "main")
        .await
        .unwrap();

    std::fs::write(laptop.repo_dir.join("config/laptop.txt"), "laptop\n").unwrap();
    commit_and_push(&laptop.repo_dir, "Laptop file");

    let repo = &env.paths.repo_dir;
    std::fs::write(repo.join("backups/local.txt"), "not committed\n").unwrap();

    let outcome = env.git().pull("main", PullStrategy::Rebase).await.unwrap();

    assert!(outcome.stashed);
    assert!(!outcome.stash_pop_failed);
    assert!(repo.join("config/laptop.txt").exists());
    assert_eq!(
        std::fs::read_to_string(repo.join("backups/local.txt")).unwrap(),
        "not committed\n"
    );
}

#[tokio::test]
async fn test_sync_backs_up_commits_and_pushes() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    env.write_home_file(".gitconfig", "[user]\n\tname = Me\n");
    env.write_home_file(".config/git/ignore", ".DS_Store\n");
    env.write_home_file(".config/git/trace.log", "noise");
    let config = env.config(vec![
        ("git", utility(&["~/.gitconfig", "~/.config/git/"], &["*.log"])),
        ("ghost", utility(&["~/Library/Application Support/Ghost/"], &[])),
    ]);

    let summary = engine(&env, config).run(REAL).await.unwrap();

    assert_matches!(summary.pull, PullStatus::Pulled(_));
    assert!(summary.failures.is_empty(), "{:?}", summary.failures);
    assert_eq!(summary.utilities_synced(), 2);
    assert!(summary.warnings.iter().any(|w| w.contains("Ghost")));
    assert_matches!(summary.commit, Some(CommitStatus::Committed(ref m)) if m.contains("2 utilities"));
    assert!(summary.push_error.is_none());
    assert!(env.paths.last_sync_file.exists());
    assert!(!env.paths.lock_file.exists());

    let files = env.remote_files("main");
    assert!(files.contains(&"backups/git/.gitconfig".to_string()));
    assert!(files.contains(&"backups/git/git/ignore".to_string()));
    assert!(!files.iter().any(|f| f.ends_with("trace.log")));
}

#[tokio::test]
async fn test_second_sync_without_changes_has_nothing_to_commit() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    env.write_home_file(".gitconfig", "[user]\n");
    let config = env.config(vec![("git", utility(&["~/.gitconfig"], &[]))]);

    engine(&env, config.clone()).run(REAL).await.unwrap();
    let summary = engine(&env, config).run(REAL).await.unwrap();

    assert_eq!(summary.commit, Some(CommitStatus::NothingToCommit));
}

#[tokio::test]
async fn test_dry_run_is_side_effect_free_and_matches_real_run() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    env.write_home_file(".gitconfig", "[user]\n");
    env.write_home_file(".config/git/ignore", "*.swp\n");
    let config = env.config(vec![("git", utility(&["~/.gitconfig", "~/.config/git/"], &[]))]);

    engine(&env, config.clone()).run(REAL).await.unwrap();
    env.write_home_file(".gitconfig", "[user]\n\tname = Changed\n");

    let tree_before = snapshot_tree(&env.paths.repo_dir);
    let stamp_before = std::fs::read(&env.paths.last_sync_file).unwrap();

    let dry = engine(&env, config.clone()).run(DRY).await.unwrap();

    assert_eq!(snapshot_tree(&env.paths.repo_dir), tree_before);
    assert_eq!(std::fs::read(&env.paths.last_sync_file).unwrap(), stamp_before);

    let real = engine(&env, config).run(REAL).await.unwrap();
    assert_eq!(dry.actions, real.actions);
    assert_ne!(snapshot_tree(&env.paths.repo_dir), tree_before);
}

#[tokio::test]
async fn test_sync_while_locked_touches_nothing() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    env.write_home_file(".gitconfig", "[user]\n");
    let config = env.config(vec![("git", utility(&["~/.gitconfig"], &[]))]);
    std::fs::write(&env.paths.lock_file, "other process").unwrap();
    let tree_before = snapshot_tree(&env.paths.repo_dir);

    let err = engine(&env, config).run(REAL).await.unwrap_err();

    assert_matches!(err.downcast_ref::<SyncError>(), Some(SyncError::AlreadySyncing(_)));
    assert_eq!(snapshot_tree(&env.paths.repo_dir), tree_before);
    assert!(!env.paths.last_sync_file.exists());
    assert_eq!(std::fs::read_to_string(&env.paths.lock_file).unwrap(), "other process");
}

#[tokio::test]
async fn test_push_failure_is_reported_after_local_commit() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    env.write_home_file(".gitconfig", "[user]\n");
    let config = env.config(vec![("git", utility(&["~/.gitconfig"], &[]))]);
    // Pull and push both fail once the remote is gone
    std::fs::remove_dir_all(&env.remote).unwrap();

    let summary = engine(&env, config).run(REAL).await.unwrap();

    assert_matches!(summary.pull, PullStatus::Failed(_));
    assert_matches!(summary.commit, Some(CommitStatus::Committed(_)));
    assert!(summary.push_error.is_some());
    assert!(env.paths.last_sync_file.exists());
}

#[tokio::test]
async fn test_restore_takes_bit_identical_safety_copy() {
    let env = TestEnvironment::new();
    env.git().init_repository(&env.remote_url(), "main").await.unwrap();
    env.write_home_file(".gitconfig", "[user]\n\tname = Backed Up\n");
    env.write_home_file(".config/git/ignore", "*.swp\n");
    let config = env.config(vec![("git", utility(&["~/.gitconfig", "~/.config/git/"], &[]))]);
    engine(&env, config.clone()).run(REAL).await.unwrap();

    let local: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let gitconfig = env.write_home_file(".gitconfig", &local);
    env.write_home_file(".config/git/ignore", "local ignore\n");

    let report = BackupEngine::new(env.paths.clone(), false)
        .restore_utility("git", &config.utilities["git"])
        .unwrap();

    assert!(report.succeeded(), "{:?}", report.failures);
    let snapshot = report.safety_backup.expect("existing files were saved");
    assert_eq!(std::fs::read(snapshot.join(".gitconfig")).unwrap(), local);
    assert_eq!(
        std::fs::read_to_string(snapshot.join(".config/git/ignore")).unwrap(),
        "local ignore\n"
    );
    assert_eq!(
        std::fs::read_to_string(&gitconfig).unwrap(),
        "[user]\n\tname = Backed Up\n"
    );
    assert_eq!(
        std::fs::read_to_string(env.paths.home.join(".config/git/ignore")).unwrap(),
        "*.swp\n"
    );
}
