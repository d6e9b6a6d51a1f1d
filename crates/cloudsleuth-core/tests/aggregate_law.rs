//! Property tests over randomly shaped tenants.
//!
//! Every container's aggregate must equal the sum over its subtree, and an
//! interrupted-then-resumed run must end exactly where an uninterrupted run
//! does.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cloudsleuth_core::checkpoint::Checkpoint;
use cloudsleuth_core::config::CrawlConfig;
use cloudsleuth_core::crawler::{self, CrawlOptions, Crawler, Scope};
use cloudsleuth_core::error::CrawlError;
use cloudsleuth_core::job::{FixedAnswer, Job};
use cloudsleuth_core::model::{ContainerTree, ListingRoot};
use cloudsleuth_core::remote::{MemoryStore, Session};
use cloudsleuth_core::report::{Recorder, ReportKind};
use proptest::prelude::*;
use tempfile::TempDir;

/// A file is a folder path (segment choices) plus a size.
type FileSpec = (Vec<u8>, u64);

fn file_path(i: usize, dirs: &[u8]) -> String {
    let mut path = String::new();
    for d in dirs {
        path.push_str(&format!("/d{d}"));
    }
    format!("{path}/f{i}.bin")
}

fn folders_of(files: &[FileSpec]) -> BTreeSet<String> {
    let mut folders = BTreeSet::new();
    for (dirs, _) in files {
        let mut path = String::new();
        for d in dirs {
            path.push_str(&format!("/d{d}"));
            folders.insert(path.clone());
        }
    }
    folders
}

fn store(files: &[FileSpec], page_size: usize) -> MemoryStore {
    let mut builder = MemoryStore::builder().page_size(page_size);
    for (i, (dirs, size)) in files.iter().enumerate() {
        builder = builder.file(ListingRoot::Home, &file_path(i, dirs), *size);
    }
    builder.build()
}

fn is_under(path: &str, container: &str) -> bool {
    container == "/" || path.starts_with(&format!("{container}/"))
}

fn crawl(dir: &Path, files: &[FileSpec], page_size: usize) -> ContainerTree {
    let session = Session::without_refresh(Arc::new(store(files, page_size)));
    let plan = crawler::plan(&session, &Scope::Account { path: "/".into() }).unwrap();
    let mut crawler = Crawler::new(
        session,
        ContainerTree::new(plan.root.clone()),
        Checkpoint::new(Checkpoint::path_for(dir, "law")),
        Recorder::create(Recorder::path_for(dir, "law"), ReportKind::Folders).unwrap(),
        CrawlOptions::new(ReportKind::Folders, &CrawlConfig::default()),
    );
    crawler.run(&plan).unwrap();
    crawler.into_parts().tree
}

fn tenant_files() -> impl Strategy<Value = Vec<FileSpec>> {
    prop::collection::vec((prop::collection::vec(0u8..3, 0..4), 0u64..10_000), 1..25)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_aggregate_equals_its_subtree(files in tenant_files(), page_size in 1usize..4) {
        let dir = TempDir::new().unwrap();
        let tree = crawl(dir.path(), &files, page_size);
        let folders = folders_of(&files);
        prop_assert_eq!(tree.len(), folders.len() + 1);

        for (idx, node) in tree.iter() {
            prop_assert!(node.is_done());
            let here = node.path_display.as_str();
            let (mut size, mut count, mut direct) = (0u64, 0u64, 0u64);
            for (i, (dirs, bytes)) in files.iter().enumerate() {
                let path = file_path(i, dirs);
                if is_under(&path, here) {
                    size += bytes;
                    count += 1;
                    let parent = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                    if parent == here || (here == "/" && parent.is_empty()) {
                        direct += 1;
                    }
                }
            }
            let below = folders.iter().filter(|f| f.as_str() != here && is_under(f, here)).count();
            let children = tree.children(idx);

            prop_assert_eq!(node.agg.size, size, "size of {}", here);
            prop_assert_eq!(node.agg.files, count, "files of {}", here);
            prop_assert_eq!(node.agg.direct_files, direct, "direct files of {}", here);
            prop_assert_eq!(node.agg.folders, below as u64, "folders of {}", here);
            prop_assert_eq!(node.agg.direct_folders, children.len() as u64);
            let nested: u64 = children.iter().map(|&c| 1 + tree.node(c).agg.folders).sum();
            prop_assert_eq!(node.agg.folders, nested);
        }
    }

    #[test]
    fn resumed_run_matches_uninterrupted_run(
        files in tenant_files(),
        page_size in 1usize..4,
        limit in 1usize..40,
    ) {
        let config = |dir: &Path| CrawlConfig {
            output_dir: dir.join("output"),
            session_dir: dir.join("session"),
            progress_interval_ms: 50,
            ..Default::default()
        };
        let scope = Scope::Account { path: "/".into() };

        let baseline_dir = TempDir::new().unwrap();
        let baseline_job = Job::new("law", scope.clone(), ReportKind::Folders, config(baseline_dir.path()));
        let baseline = baseline_job
            .run(
                Session::without_refresh(Arc::new(store(&files, page_size))),
                &mut FixedAnswer(true),
                Arc::default(),
                |_, _| {},
            )
            .unwrap();

        let dir = TempDir::new().unwrap();
        let job = Job::new("law", scope, ReportKind::Folders, config(dir.path()));
        let cancel = Arc::new(AtomicBool::new(false));
        let mut interrupting = MemoryStore::builder().page_size(page_size);
        for (i, (dirs, size)) in files.iter().enumerate() {
            interrupting = interrupting.file(ListingRoot::Home, &file_path(i, dirs), *size);
        }
        let interrupting = interrupting.cancel_after(limit, cancel.clone()).build();
        match job.run(
            Session::without_refresh(Arc::new(interrupting)),
            &mut FixedAnswer(true),
            cancel,
            |_, _| {},
        ) {
            Ok(_) | Err(CrawlError::Interrupted) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }

        let resumed = job
            .run(
                Session::without_refresh(Arc::new(store(&files, page_size))),
                &mut FixedAnswer(true),
                Arc::default(),
                |_, _| {},
            )
            .unwrap();

        prop_assert_eq!(resumed.root, baseline.root);
        prop_assert_eq!(resumed.stats.files, files.len() as u64);
        prop_assert_eq!(
            fs::read_to_string(&resumed.report).unwrap(),
            fs::read_to_string(&baseline.report).unwrap()
        );
    }
}
