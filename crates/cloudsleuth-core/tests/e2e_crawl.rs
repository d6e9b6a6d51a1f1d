//! End-to-end crawl tests.
//!
//! These drive a complete [`Job`] against the in-memory tenant and real
//! artifact files in a temporary directory: planning, traversal,
//! checkpointing, report writing, interruption and resume.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use cloudsleuth_core::checkpoint::Checkpoint;
use cloudsleuth_core::config::CrawlConfig;
use cloudsleuth_core::crawler::{self, CrawlOptions, Crawler, CrawlParts, Scope};
use cloudsleuth_core::error::{CrawlError, RemoteError};
use cloudsleuth_core::job::{FixedAnswer, Job, RunSummary};
use cloudsleuth_core::model::{ContainerTree, ListingRoot};
use cloudsleuth_core::remote::{
    AccessLevel, Grants, LocalStore, Member, MemoryStore, MemoryStoreBuilder, Namespace,
    NamespaceKind, Session, TokenRefresher, UserGrant,
};
use cloudsleuth_core::report::{Recorder, ReportKind};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// ```text
/// /
///   Alpha/
///     a1.bin        (100 bytes)
///     a2.bin        (200 bytes)
///     Deep/Deeper/
///       d.bin       (50 bytes)
///   Beta/
///     b.bin         (300 bytes)
///     Sub/s.bin     (7 bytes)
///   Gamma/          (empty)
///   root.bin        (1 000 bytes)
/// ```
fn tenant() -> MemoryStoreBuilder {
    MemoryStore::builder()
        .file(ListingRoot::Home, "/Alpha/a1.bin", 100)
        .file(ListingRoot::Home, "/Alpha/a2.bin", 200)
        .file(ListingRoot::Home, "/Alpha/Deep/Deeper/d.bin", 50)
        .file(ListingRoot::Home, "/Beta/b.bin", 300)
        .file(ListingRoot::Home, "/Beta/Sub/s.bin", 7)
        .folder(ListingRoot::Home, "/Gamma")
        .file(ListingRoot::Home, "/root.bin", 1_000)
        .page_size(2)
}

fn config(dir: &Path) -> CrawlConfig {
    CrawlConfig {
        output_dir: dir.join("output"),
        session_dir: dir.join("session"),
        progress_interval_ms: 50,
        ..Default::default()
    }
}

fn account_job(dir: &Path, report: ReportKind) -> Job {
    Job::new(
        "audit",
        Scope::Account { path: "/".into() },
        report,
        config(dir),
    )
}

fn session(store: MemoryStore) -> Session {
    Session::without_refresh(Arc::new(store))
}

fn run(job: &Job, store: MemoryStore) -> Result<RunSummary, CrawlError> {
    job.run(session(store), &mut FixedAnswer(true), Arc::default(), |_, _| {})
}

fn report_lines(summary: &RunSummary) -> Vec<String> {
    fs::read_to_string(&summary.report)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn csv_rows(summary: &RunSummary) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(&summary.report).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

/// Crawl `job`'s scope to completion with its own artifact paths, stopping
/// short of the finalisation [`Job::run`] performs.
fn crawl_without_finishing(job: &Job, store: MemoryStore) -> CrawlParts {
    let session = session(store);
    let plan = crawler::plan(&session, &job.scope).unwrap();
    let mut crawler = Crawler::new(
        session,
        ContainerTree::new(plan.root.clone()),
        Checkpoint::new(job.checkpoint_path()),
        Recorder::create(job.report_path(), job.report).unwrap(),
        CrawlOptions::new(job.report, &job.config),
    );
    crawler.run(&plan).unwrap();
    crawler.into_parts()
}

fn tenant_of_two() -> MemoryStoreBuilder {
    let ada = ListingRoot::Member("dbmid:1".into());
    MemoryStore::builder()
        .member(Member {
            id: "dbmid:1".into(),
            email: "ada@x.com".into(),
            name: "Ada".into(),
        })
        .namespace(Namespace {
            id: "77".into(),
            name: "Engineering".into(),
            kind: NamespaceKind::TeamFolder,
            team_member_id: None,
        })
        .file(ada.clone(), "/Notes/n.txt", 10)
        .folder(ada, "/Archive")
        .file(ListingRoot::Namespace("77".into()), "/Specs/s.pdf", 90)
}

fn owner_grants(owner: &str) -> Grants {
    Grants {
        users: vec![UserGrant {
            email: owner.into(),
            account_id: format!("dbid:{owner}"),
            access: AccessLevel::Owner,
        }],
        groups: Vec::new(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn uninterrupted_run_aggregates_whole_tree() {
    let dir = TempDir::new().unwrap();
    let summary = run(&account_job(dir.path(), ReportKind::Folders), tenant().build()).unwrap();

    assert_eq!(summary.root.size, 1_657);
    assert_eq!(summary.root.files, 6);
    assert_eq!(summary.root.direct_files, 1);
    assert_eq!(summary.root.folders, 6);
    assert_eq!(summary.root.direct_folders, 3);
    assert_eq!(summary.stats.files, 6);
    assert_eq!(summary.stats.bytes, 1_657);
    assert!(!summary.stats.running);
}

#[test]
fn rows_are_reversed_into_root_first_order() {
    let dir = TempDir::new().unwrap();
    let summary = run(&account_job(dir.path(), ReportKind::Folders), tenant().build()).unwrap();
    let rows = csv_rows(&summary);

    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0][1], "/");
    // The first container to complete is the deepest on the first branch.
    assert_eq!(rows.last().unwrap()[1], "/Alpha/Deep/Deeper");
    let alpha = rows.iter().position(|r| r[1] == "/Alpha").unwrap();
    let deep = rows.iter().position(|r| r[1] == "/Alpha/Deep").unwrap();
    assert!(alpha < deep);
}

#[test]
fn level_limit_keeps_root_and_shallow_rows() {
    let dir = TempDir::new().unwrap();
    let mut job = account_job(dir.path(), ReportKind::Folders);
    job.config.max_level = 1;
    let summary = run(&job, tenant().build()).unwrap();
    let paths: Vec<String> = csv_rows(&summary).into_iter().map(|r| r[1].clone()).collect();
    assert_eq!(paths, vec!["/", "/Gamma", "/Beta", "/Alpha"]);
}

#[test]
fn resume_from_any_interruption_matches_uninterrupted_run() {
    let baseline_dir = TempDir::new().unwrap();
    let baseline = run(
        &account_job(baseline_dir.path(), ReportKind::Folders),
        tenant().build(),
    )
    .unwrap();
    let expected = report_lines(&baseline);

    let mut interrupted_runs = 0;
    for limit in 1..=12 {
        let dir = TempDir::new().unwrap();
        let job = account_job(dir.path(), ReportKind::Folders);
        let cancel = Arc::new(AtomicBool::new(false));
        let store = tenant().cancel_after(limit, cancel.clone()).build();

        match job.run(session(store), &mut FixedAnswer(true), cancel, |_, _| {}) {
            Ok(_) => continue,
            Err(CrawlError::Interrupted) => interrupted_runs += 1,
            Err(e) => panic!("unexpected error at limit {limit}: {e}"),
        }
        assert!(job.checkpoint_path().exists());
        assert!(job.report_path().exists());

        let resumed = run(&job, tenant().build()).unwrap();
        assert!(resumed.resumed, "limit {limit}");
        assert_eq!(report_lines(&resumed)[1], expected[1], "root row, limit {limit}");
        assert_eq!(report_lines(&resumed), expected, "full report, limit {limit}");
        assert_eq!(resumed.root, baseline.root, "limit {limit}");
        assert_eq!(resumed.stats.files, 6, "no double counting, limit {limit}");
        assert_eq!(resumed.stats.bytes, 1_657, "limit {limit}");
        assert!(!job.checkpoint_path().exists());
    }
    assert!(interrupted_runs >= 5);
}

#[test]
fn resume_after_repeated_interruptions_converges() {
    let baseline_dir = TempDir::new().unwrap();
    let baseline = run(
        &account_job(baseline_dir.path(), ReportKind::Folders),
        tenant().build(),
    )
    .unwrap();

    let dir = TempDir::new().unwrap();
    let job = account_job(dir.path(), ReportKind::Folders);
    let mut attempts = 0;
    let summary = loop {
        attempts += 1;
        assert!(attempts < 50, "run never converged");
        let cancel = Arc::new(AtomicBool::new(false));
        // Each attempt gets a little further than the one before.
        let store = tenant().cancel_after(2 * attempts + 2, cancel.clone()).build();
        match job.run(session(store), &mut FixedAnswer(true), cancel, |_, _| {}) {
            Ok(summary) => break summary,
            Err(CrawlError::Interrupted) => continue,
            Err(e) => panic!("unexpected error: {e}"),
        }
    };
    assert!(attempts > 1);
    assert_eq!(summary.root, baseline.root);
    assert_eq!(report_lines(&summary), report_lines(&baseline));
}

#[test]
fn completed_checkpoint_beside_unreversed_report_is_finished_once() {
    let baseline_dir = TempDir::new().unwrap();
    let baseline = run(
        &account_job(baseline_dir.path(), ReportKind::Folders),
        tenant().build(),
    )
    .unwrap();

    // Killed after the walk completed, before the checkpoint was removed.
    let dir = TempDir::new().unwrap();
    let job = account_job(dir.path(), ReportKind::Folders);
    let parts = crawl_without_finishing(&job, tenant().build());
    parts.recorder.close().unwrap();
    assert!(job.checkpoint_path().exists());

    let resumed = run(&job, tenant().build()).unwrap();
    assert!(resumed.resumed);
    assert_eq!(csv_rows(&resumed)[0][1], "/");
    assert_eq!(report_lines(&resumed), report_lines(&baseline));
    assert!(!job.checkpoint_path().exists());

    // The finished report stands alone and is never reversed again.
    let again = run(&job, tenant().build()).unwrap();
    assert!(!again.resumed);
    assert_eq!(report_lines(&again), report_lines(&baseline));
}

#[test]
fn kill_between_checkpoint_removal_and_reversal_restarts_cleanly() {
    let baseline_dir = TempDir::new().unwrap();
    let baseline = run(
        &account_job(baseline_dir.path(), ReportKind::Folders),
        tenant().build(),
    )
    .unwrap();

    let dir = TempDir::new().unwrap();
    let job = account_job(dir.path(), ReportKind::Folders);
    let parts = crawl_without_finishing(&job, tenant().build());
    parts.checkpoint.remove().unwrap();
    parts.recorder.close().unwrap();
    assert!(job.report_path().exists());

    let summary = run(&job, tenant().build()).unwrap();
    assert!(!summary.resumed);
    assert_eq!(csv_rows(&summary)[0][1], "/");
    assert_eq!(report_lines(&summary), report_lines(&baseline));
}

#[test]
fn changed_path_under_same_name_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let mut job = account_job(dir.path(), ReportKind::Folders);
    job.scope = Scope::Account {
        path: "/Alpha".into(),
    };
    let cancel = Arc::new(AtomicBool::new(false));
    let store = tenant().cancel_after(2, cancel.clone()).build();
    assert!(matches!(
        job.run(session(store), &mut FixedAnswer(true), cancel, |_, _| {}),
        Err(CrawlError::Interrupted)
    ));
    assert!(job.checkpoint_path().exists());

    job.scope = Scope::Account {
        path: "/Beta".into(),
    };
    let summary = run(&job, tenant().build()).unwrap();
    assert!(!summary.resumed);
    assert_eq!(summary.root.size, 307);
    assert_eq!(summary.root.files, 2);
    let rows = csv_rows(&summary);
    assert!(rows.iter().any(|r| r[1] == "/Beta/Sub"));
    assert!(rows.iter().all(|r| !r[1].starts_with("/Alpha")));
}

#[test]
fn tenant_resume_with_dropped_namespace_family_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let mut job = Job::new(
        "tenant",
        Scope::Tenant {
            members: true,
            team: true,
            other: true,
        },
        ReportKind::Folders,
        config(dir.path()),
    );
    // Interrupted inside Ada's space, after one of her folders completed.
    let cancel = Arc::new(AtomicBool::new(false));
    let store = tenant_of_two().page_size(1).cancel_after(3, cancel.clone()).build();
    assert!(matches!(
        job.run(session(store), &mut FixedAnswer(true), cancel, |_, _| {}),
        Err(CrawlError::Interrupted)
    ));
    assert!(job.checkpoint_path().exists());

    job.scope = Scope::Tenant {
        members: false,
        team: true,
        other: false,
    };
    let summary = run(&job, tenant_of_two().build()).unwrap();
    assert!(!summary.resumed);
    assert_eq!(summary.root.size, 90);
    assert_eq!(summary.root.files, 1);
    assert!(csv_rows(&summary).iter().all(|r| r[0] != "ada@x.com"));
}

#[test]
fn tenant_resume_under_same_plan_continues() {
    let dir = TempDir::new().unwrap();
    let job = Job::new(
        "tenant",
        Scope::Tenant {
            members: true,
            team: true,
            other: true,
        },
        ReportKind::Folders,
        config(dir.path()),
    );
    let cancel = Arc::new(AtomicBool::new(false));
    let store = tenant_of_two().page_size(1).cancel_after(3, cancel.clone()).build();
    assert!(matches!(
        job.run(session(store), &mut FixedAnswer(true), cancel, |_, _| {}),
        Err(CrawlError::Interrupted)
    ));

    let summary = run(&job, tenant_of_two().build()).unwrap();
    assert!(summary.resumed);
    assert_eq!(summary.root.size, 100);
    assert_eq!(summary.root.files, 2);
}

#[test]
fn member_walk_prunes_content_owned_by_someone_else() {
    let alice = ListingRoot::Member("dbmid:a".into());
    let store = MemoryStore::builder()
        .member(Member {
            id: "dbmid:a".into(),
            email: "alice@x.com".into(),
            name: "Alice".into(),
        })
        .shared_folder(alice.clone(), "/Mine", "sf-mine")
        .file(alice.clone(), "/Mine/m.bin", 10)
        .shared_folder(alice.clone(), "/Theirs", "sf-theirs")
        .file(alice.clone(), "/Theirs/t.bin", 5_000)
        .file(alice.clone(), "/Theirs/Nested/n.bin", 5_000)
        .file(alice.clone(), "/Plain/p.bin", 1)
        .grants("sf-mine", owner_grants("Alice@X.com"))
        .grants("sf-theirs", owner_grants("bob@x.com"))
        .build();

    let dir = TempDir::new().unwrap();
    let job = Job::new(
        "alice",
        Scope::Member {
            identity: "alice".into(),
            path: "/".into(),
        },
        ReportKind::Folders,
        config(dir.path()),
    );
    let summary = run(&job, store).unwrap();

    assert_eq!(summary.root.size, 11);
    assert_eq!(summary.root.files, 2);
    assert_eq!(summary.root.folders, 2);
    assert_eq!(summary.root.shared_folders, 1);
    assert_eq!(summary.root.private_folders, 1);
    assert_eq!(summary.stats.skipped, 1);

    let rows = csv_rows(&summary);
    assert!(rows.iter().all(|r| !r[1].starts_with("/Theirs")));
    let mine = rows.iter().find(|r| r[1] == "/Mine").unwrap();
    assert_eq!(mine[0], "alice@x.com");
    assert_eq!(mine[2], "Shared");
    assert_eq!(mine[3], "Alice@X.com");
    assert_eq!(mine[11], "(O)Alice@X.com");
}

#[test]
fn duplicates_are_flagged_across_branches() {
    let store = MemoryStore::builder()
        .file_with_content(ListingRoot::Home, "/A/one.txt", "same bytes")
        .file_with_content(ListingRoot::Home, "/B/other.txt", "different")
        .file_with_content(ListingRoot::Home, "/B/two.txt", "same bytes")
        .build();
    let dir = TempDir::new().unwrap();
    let mut job = account_job(dir.path(), ReportKind::Files);
    job.config.inspect.enabled = false;
    let summary = run(&job, store).unwrap();

    let rows = csv_rows(&summary);
    assert_eq!(rows.len(), 3);
    let flag = |name: &str| rows.iter().find(|r| r[2] == name).unwrap()[9].clone();
    assert_eq!(flag("one.txt"), "");
    assert_eq!(flag("other.txt"), "");
    assert_eq!(flag("two.txt"), "Y");
    let one = rows.iter().find(|r| r[2] == "one.txt").unwrap();
    assert_eq!(one[4], blake3::hash(b"same bytes").to_hex().to_string());
}

#[test]
fn files_report_carries_inspection_results() {
    let docx_text = "see https://www.dropbox.com/s/abc/plan.xlsx for details";
    let store = MemoryStore::builder()
        .file_with_content(ListingRoot::Home, "/Docs/notes.txt", docx_text)
        .file(ListingRoot::Home, "/Data/plan.xlsx", 4_096)
        .link(
            "https://www.dropbox.com/s/abc/plan.xlsx",
            ListingRoot::Home,
            "/Data/plan.xlsx",
        )
        .build();
    let dir = TempDir::new().unwrap();
    let mut job = account_job(dir.path(), ReportKind::Files);
    job.config.inspect.concurrency = 2;
    let summary = run(&job, store).unwrap();

    let rows = csv_rows(&summary);
    let notes = rows.iter().find(|r| r[2] == "notes.txt").unwrap();
    assert_eq!(
        notes[11],
        "https://www.dropbox.com/s/abc/plan.xlsx -> File plan.xlsx (4096 bytes)"
    );
    // The linked file has no downloadable content; its inspection finds nothing.
    let plan = rows.iter().find(|r| r[2] == "plan.xlsx").unwrap();
    assert_eq!(plan[11], "");
    assert_eq!(summary.stats.inspected + summary.stats.inspect_failed, 2);
}

#[test]
fn resumed_files_report_keeps_duplicate_detection() {
    let build = || {
        MemoryStore::builder()
            .file_with_content(ListingRoot::Home, "/A/first.txt", "dup")
            .file_with_content(ListingRoot::Home, "/B/second.txt", "dup")
    };
    let dir = TempDir::new().unwrap();
    let mut job = account_job(dir.path(), ReportKind::Files);
    job.config.inspect.enabled = false;

    // Listing calls: root, /A, /B. Interrupt once /B has been listed, after
    // /A and its row are recorded.
    let cancel = Arc::new(AtomicBool::new(false));
    let store = build().cancel_after(3, cancel.clone()).build();
    assert!(matches!(
        job.run(session(store), &mut FixedAnswer(true), cancel, |_, _| {}),
        Err(CrawlError::Interrupted)
    ));

    let summary = run(&job, build().build()).unwrap();
    assert!(summary.resumed);
    let rows = csv_rows(&summary);
    assert_eq!(rows.len(), 2);
    let second = rows.iter().find(|r| r[2] == "second.txt").unwrap();
    assert_eq!(second[9], "Y");
}

#[test]
fn corrupt_checkpoint_falls_back_to_fresh_run() {
    let dir = TempDir::new().unwrap();
    let job = account_job(dir.path(), ReportKind::Folders);
    fs::create_dir_all(dir.path().join("session")).unwrap();
    fs::create_dir_all(dir.path().join("output")).unwrap();
    fs::write(job.checkpoint_path(), "{ not json").unwrap();
    fs::write(job.report_path(), "Namespace,Path\n").unwrap();

    let summary = run(&job, tenant().build()).unwrap();
    assert!(!summary.resumed);
    assert_eq!(summary.root.files, 6);
    assert_eq!(csv_rows(&summary).len(), 7);
}

#[test]
fn truncated_report_falls_back_to_fresh_run() {
    let dir = TempDir::new().unwrap();
    let job = account_job(dir.path(), ReportKind::Folders);
    let cancel = Arc::new(AtomicBool::new(false));
    let store = tenant().cancel_after(8, cancel.clone()).build();
    assert!(matches!(
        job.run(session(store), &mut FixedAnswer(true), cancel, |_, _| {}),
        Err(CrawlError::Interrupted)
    ));

    // Drop every data row; the checkpoint now expects rows that are gone.
    let text = fs::read_to_string(job.report_path()).unwrap();
    let header = text.lines().next().unwrap().to_string();
    fs::write(job.report_path(), format!("{header}\n")).unwrap();

    let summary = run(&job, tenant().build()).unwrap();
    assert!(!summary.resumed);
    assert_eq!(csv_rows(&summary).len(), 7);
}

struct CountingRefresher(AtomicUsize);

impl TokenRefresher for CountingRefresher {
    fn refresh(&self) -> Result<(), RemoteError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn expired_authorization_is_refreshed_mid_run() {
    let dir = TempDir::new().unwrap();
    let refresher = Arc::new(CountingRefresher(AtomicUsize::new(0)));
    let store = Arc::new(tenant().fail_auth_once().build());
    let summary = account_job(dir.path(), ReportKind::Folders)
        .run(
            Session::new(store, refresher.clone()),
            &mut FixedAnswer(true),
            Arc::default(),
            |_, _| {},
        )
        .unwrap();
    assert_eq!(refresher.0.load(Ordering::SeqCst), 1);
    assert_eq!(summary.root.files, 6);
}

#[test]
fn tenant_members_report_has_one_row_per_namespace() {
    let ada = ListingRoot::Member("dbmid:1".into());
    let store = MemoryStore::builder()
        .member(Member {
            id: "dbmid:1".into(),
            email: "ada@x.com".into(),
            name: "Ada".into(),
        })
        .namespace(Namespace {
            id: "77".into(),
            name: "Engineering".into(),
            kind: NamespaceKind::TeamFolder,
            team_member_id: None,
        })
        .file(ada.clone(), "/Notes/n.txt", 10)
        .folder(ada, "/Archive")
        .file(ListingRoot::Namespace("77".into()), "/Specs/s.pdf", 90)
        .build();
    let dir = TempDir::new().unwrap();
    let job = Job::new(
        "tenant",
        Scope::Tenant {
            members: true,
            team: true,
            other: true,
        },
        ReportKind::Members,
        config(dir.path()),
    );
    let summary = run(&job, store).unwrap();

    let rows = csv_rows(&summary);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], "");
    assert_eq!(rows[0][7], "100");
    let ada_row = rows.iter().find(|r| r[0] == "ada@x.com").unwrap();
    assert_eq!(ada_row[1], "ada@x.com");
    assert_eq!(ada_row[2], "Private");
    assert_eq!(ada_row[3], "2");
    assert_eq!(ada_row[5], "2");
    let eng = rows.iter().find(|r| r[0] == "Engineering").unwrap();
    assert_eq!(eng[2], "Team");
    assert_eq!(eng[6], "1");
    assert_eq!(summary.root.folders, 5);
}

#[test]
fn local_directory_tree_is_audited() {
    let tree = TempDir::new().unwrap();
    fs::create_dir_all(tree.path().join("Projects/Old")).unwrap();
    fs::write(tree.path().join("Projects/plan.md"), vec![b'x'; 120]).unwrap();
    fs::write(tree.path().join("Projects/Old/v1.md"), vec![b'y'; 30]).unwrap();
    fs::write(tree.path().join("readme.txt"), b"hi").unwrap();

    let out = TempDir::new().unwrap();
    let mut job = account_job(out.path(), ReportKind::Folders);
    job.config.resolve_revisions = false;
    let summary = job
        .run(
            Session::without_refresh(Arc::new(LocalStore::new(tree.path()).with_page_size(1))),
            &mut FixedAnswer(true),
            Arc::default(),
            |_, _| {},
        )
        .unwrap();

    assert_eq!(summary.root.size, 152);
    assert_eq!(summary.root.files, 3);
    assert_eq!(summary.root.folders, 2);
    let rows = csv_rows(&summary);
    let projects = rows.iter().find(|r| r[1] == "/Projects").unwrap();
    assert_eq!(projects[4], "150");
    assert_eq!(projects[6], "1");
}
