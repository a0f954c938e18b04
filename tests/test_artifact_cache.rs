//! Tests for build and run-output caching

use rstest::{fixture, rstest};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use hpc_extras::cache::{
    ArtifactCache, ArtifactKind, ArtifactRecord, BuildKey, BuildLookup, BuildStep, CachingHooks,
    NOOP_SCRIPT, RunCacheSetting, TestContext, TestPhaseHooks,
};
use hpc_extras::config::CacheConfig;
use hpc_extras::errors::ExtrasError;

#[fixture]
fn key() -> BuildKey {
    BuildKey::new("archer2", "compute-node", "cray", "IMB_MPI1").unwrap()
}

/// Files under `dir`, relative and sorted
fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

// ============== Build Cache ==============

#[rstest]
fn test_build_cache_miss_then_hit(key: BuildKey) {
    let tmp = TempDir::new().unwrap();
    let cache = ArtifactCache::new(tmp.path().join("builds"));
    let exe = Path::new("IMB-MPI1");

    assert_eq!(cache.resolve_build(&key, exe).unwrap(), BuildLookup::Miss);

    let produced = tmp.path().join("stage/IMB-MPI1");
    fs::create_dir_all(produced.parent().unwrap()).unwrap();
    fs::write(&produced, b"\x7fELF").unwrap();

    let record = cache.on_build_miss_complete(&key, exe, &produced).unwrap();
    assert_eq!(record.kind, ArtifactKind::Build);
    assert_eq!(
        record.artifact_path,
        tmp.path()
            .join("builds/archer2/compute-node/cray/IMB_MPI1/IMB-MPI1")
    );

    for _ in 0..3 {
        match cache.resolve_build(&key, exe).unwrap() {
            BuildLookup::Cached(hit) => assert_eq!(hit, record),
            BuildLookup::Miss => panic!("expected a cache hit"),
        }
    }
    assert_eq!(fs::read(&record.artifact_path).unwrap(), b"\x7fELF");
}

#[rstest]
fn test_build_cache_executable_in_subdirectory(key: BuildKey) {
    let tmp = TempDir::new().unwrap();
    let cache = ArtifactCache::new(tmp.path().join("builds"));
    let exe = Path::new("bin/mpi/osu_latency");

    let produced = tmp.path().join("stage").join(exe);
    fs::create_dir_all(produced.parent().unwrap()).unwrap();
    fs::write(&produced, "exe").unwrap();

    cache.on_build_miss_complete(&key, exe, &produced).unwrap();
    assert!(cache.resolve_build(&key, exe).unwrap().is_hit());
    assert!(
        cache
            .build_dir(&key)
            .join("bin/mpi/osu_latency")
            .is_file()
    );
}

#[rstest]
fn test_keys_are_isolated(key: BuildKey) {
    let tmp = TempDir::new().unwrap();
    let cache = ArtifactCache::new(tmp.path());
    let other = BuildKey::new("archer2", "compute-node", "gnu", "IMB_MPI1").unwrap();

    let produced = tmp.path().join("a.out");
    fs::write(&produced, "exe").unwrap();
    cache
        .on_build_miss_complete(&key, Path::new("a.out"), &produced)
        .unwrap();

    assert!(cache.resolve_build(&key, Path::new("a.out")).unwrap().is_hit());
    assert!(!cache.resolve_build(&other, Path::new("a.out")).unwrap().is_hit());
}

#[rstest]
fn test_failed_publish_leaves_no_artifact(key: BuildKey) {
    let tmp = TempDir::new().unwrap();
    let cache = ArtifactCache::new(tmp.path().join("builds"));
    let exe = Path::new("IMB-MPI1");

    let result = cache.on_build_miss_complete(&key, exe, &tmp.path().join("stage/missing"));
    assert!(matches!(result, Err(ExtrasError::Io { .. })));
    assert_eq!(cache.resolve_build(&key, exe).unwrap(), BuildLookup::Miss);

    let build_dir = cache.build_dir(&key);
    if build_dir.exists() {
        assert!(list_files(&build_dir).is_empty());
    }
}

#[rstest]
fn test_republish_replaces_whole_file(key: BuildKey) {
    let tmp = TempDir::new().unwrap();
    let cache = ArtifactCache::new(tmp.path().join("builds"));
    let exe = Path::new("app");
    let produced = tmp.path().join("app");

    fs::write(&produced, "a much longer first build").unwrap();
    cache.on_build_miss_complete(&key, exe, &produced).unwrap();
    fs::write(&produced, "second").unwrap();
    let record = cache.on_build_miss_complete(&key, exe, &produced).unwrap();

    assert_eq!(fs::read_to_string(&record.artifact_path).unwrap(), "second");
    assert_eq!(list_files(&cache.build_dir(&key)), vec![PathBuf::from("app")]);
}

#[rstest]
#[case("/abs/app")]
#[case("../app")]
#[case("bin/../../app")]
fn test_rejects_escaping_executables(key: BuildKey, #[case] exe: &str) {
    let cache = ArtifactCache::new("builds");
    assert!(matches!(
        cache.resolve_build(&key, Path::new(exe)),
        Err(ExtrasError::InvalidCacheKey { .. })
    ));
}

// ============== Run-Output Cache ==============

struct RunDirs {
    _tmp: TempDir,
    cache_root: PathBuf,
    output_root: PathBuf,
    output_dir: PathBuf,
    stage_dir: PathBuf,
}

#[fixture]
fn run_dirs() -> RunDirs {
    let tmp = TempDir::new().unwrap();
    let cache_root = tmp.path().join("cache");
    let output_root = tmp.path().join("output");
    let output_dir = output_root.join("archer2/compute-node/cray/IMB_MPI1");
    let stage_dir = tmp.path().join("stage/archer2/compute-node/cray/IMB_MPI1");
    fs::create_dir_all(&stage_dir).unwrap();
    RunDirs {
        _tmp: tmp,
        cache_root,
        output_root,
        output_dir,
        stage_dir,
    }
}

fn record_output(dirs: &RunDirs) -> PathBuf {
    let saved = dirs
        .cache_root
        .join("archer2/compute-node/cray/IMB_MPI1");
    fs::create_dir_all(saved.join("sub")).unwrap();
    fs::write(saved.join("a.txt"), "alpha").unwrap();
    fs::write(saved.join("sub/b.txt"), "beta").unwrap();
    saved
}

#[rstest]
fn test_run_cache_fidelity(run_dirs: RunDirs, key: BuildKey) {
    let saved = record_output(&run_dirs);
    let cache = ArtifactCache::new("builds");

    let restored = cache
        .resolve_run_output(
            &key,
            &run_dirs.cache_root,
            &run_dirs.output_dir,
            &run_dirs.output_root,
            &run_dirs.stage_dir,
        )
        .unwrap();

    assert_eq!(
        restored.record,
        ArtifactRecord {
            key,
            artifact_path: saved,
            kind: ArtifactKind::RunOutput,
        }
    );
    let expected = vec![PathBuf::from("a.txt"), PathBuf::from("sub/b.txt")];
    assert_eq!(restored.files, expected);
    assert_eq!(list_files(&run_dirs.stage_dir), expected);
    assert_eq!(
        fs::read_to_string(run_dirs.stage_dir.join("a.txt")).unwrap(),
        "alpha"
    );
    assert_eq!(
        fs::read_to_string(run_dirs.stage_dir.join("sub/b.txt")).unwrap(),
        "beta"
    );
}

#[rstest]
fn test_missing_run_cache_is_fatal(run_dirs: RunDirs, key: BuildKey) {
    let cache = ArtifactCache::new("builds");
    let err = cache
        .resolve_run_output(
            &key,
            &run_dirs.cache_root,
            &run_dirs.output_dir,
            &run_dirs.output_root,
            &run_dirs.stage_dir,
        )
        .unwrap_err();

    match err {
        ExtrasError::MissingCacheEntry { path } => {
            assert!(path.is_absolute());
            assert!(path.ends_with("cache/archer2/compute-node/cray/IMB_MPI1"));
        }
        other => panic!("expected MissingCacheEntry, got {:?}", other),
    }
    assert!(list_files(&run_dirs.stage_dir).is_empty());
}

#[rstest]
fn test_run_cache_entry_that_is_a_file_is_fatal(run_dirs: RunDirs, key: BuildKey) {
    let saved = run_dirs
        .cache_root
        .join("archer2/compute-node/cray/IMB_MPI1");
    fs::create_dir_all(saved.parent().unwrap()).unwrap();
    fs::write(&saved, "not a directory").unwrap();

    let cache = ArtifactCache::new("builds");
    assert!(matches!(
        cache.resolve_run_output(
            &key,
            &run_dirs.cache_root,
            &run_dirs.output_dir,
            &run_dirs.output_root,
            &run_dirs.stage_dir,
        ),
        Err(ExtrasError::MissingCacheEntry { .. })
    ));
}

#[rstest]
fn test_run_cache_rejects_output_dir_escaping_root(run_dirs: RunDirs, key: BuildKey) {
    record_output(&run_dirs);
    let cache = ArtifactCache::new("builds");
    let escaping = run_dirs.output_root.join("../cache/archer2/compute-node/cray/IMB_MPI1");

    let result = cache.resolve_run_output(
        &key,
        &run_dirs.cache_root,
        &escaping,
        &run_dirs.output_root,
        &run_dirs.stage_dir,
    );
    assert!(matches!(result, Err(ExtrasError::InvalidPath { .. })));
    assert!(list_files(&run_dirs.stage_dir).is_empty());
}

// ============== Phase Hooks ==============

fn context(dirs: &RunDirs, key: BuildKey, executable: &str) -> TestContext {
    TestContext::new(
        key,
        executable,
        &dirs.stage_dir,
        &dirs.output_dir,
        &dirs.output_root,
    )
}

#[rstest]
fn test_hooks_build_then_reuse(run_dirs: RunDirs, key: BuildKey) {
    let hooks = CachingHooks::new(ArtifactCache::new(run_dirs.cache_root.join("builds")))
        .with_build_caching(true);

    // First invocation: miss, real build, publish.
    let mut first = context(&run_dirs, key.clone(), "IMB-MPI1");
    hooks.before_build(&mut first).unwrap();
    assert_eq!(first.build_step, BuildStep::Configured);
    assert!(first.build_path.is_none());
    assert!(first.sources_dir.is_none());

    fs::write(run_dirs.stage_dir.join("IMB-MPI1"), "built").unwrap();
    hooks.after_build(&mut first).unwrap();

    // Second invocation: hit, no-op build, sources from the cache.
    let mut second = context(&run_dirs, key, "IMB-MPI1");
    hooks.before_build(&mut second).unwrap();
    assert_eq!(second.build_step, BuildStep::NoOp);
    let build_dir = hooks.cache.build_dir(&second.key);
    assert_eq!(second.sources_dir.as_deref(), Some(build_dir.as_path()));
    assert_eq!(
        second.build_path.as_deref(),
        Some(build_dir.join("IMB-MPI1").as_path())
    );

    // A hit is never re-published.
    fs::write(run_dirs.stage_dir.join("IMB-MPI1"), "changed").unwrap();
    hooks.after_build(&mut second).unwrap();
    assert_eq!(
        fs::read_to_string(build_dir.join("IMB-MPI1")).unwrap(),
        "built"
    );
}

#[rstest]
fn test_hooks_disabled_do_nothing(run_dirs: RunDirs, key: BuildKey) {
    let hooks = CachingHooks::new(ArtifactCache::new(run_dirs.cache_root.join("builds")));
    let mut test = context(&run_dirs, key, "IMB-MPI1");

    hooks.before_build(&mut test).unwrap();
    hooks.after_build(&mut test).unwrap();
    hooks.before_run(&mut test).unwrap();

    assert_eq!(test.build_step, BuildStep::Configured);
    assert_eq!(test.executable, "IMB-MPI1");
    assert!(!run_dirs.cache_root.exists());
}

#[rstest]
fn test_hooks_cached_run(run_dirs: RunDirs, key: BuildKey) {
    record_output(&run_dirs);
    let hooks = CachingHooks::new(ArtifactCache::new("builds").with_run_cache_root(&run_dirs.cache_root))
        .with_run_cache(RunCacheSetting::DefaultRoot);
    let mut test = context(&run_dirs, key, "IMB-MPI1");
    test.executable_opts = vec!["PingPong".to_string()];

    hooks.before_run(&mut test).unwrap();

    assert_eq!(test.executable, "./noop.sh");
    assert_eq!(
        fs::read_to_string(run_dirs.stage_dir.join("noop.sh")).unwrap(),
        NOOP_SCRIPT
    );
    assert_eq!(
        fs::read_to_string(run_dirs.stage_dir.join("sub/b.txt")).unwrap(),
        "beta"
    );
}

#[rstest]
fn test_hooks_cached_run_root_override(run_dirs: RunDirs, key: BuildKey) {
    let hooks = CachingHooks::from_config(&CacheConfig::default())
        .with_run_cache(RunCacheSetting::Root(run_dirs.cache_root.clone()));
    record_output(&run_dirs);
    let mut test = context(&run_dirs, key, "IMB-MPI1");

    hooks.before_run(&mut test).unwrap();
    assert_eq!(test.executable, "./noop.sh");
}

#[rstest]
fn test_hooks_cached_run_missing_entry_keeps_executable(run_dirs: RunDirs, key: BuildKey) {
    let hooks = CachingHooks::new(ArtifactCache::new("builds"))
        .with_run_cache(RunCacheSetting::Root(run_dirs.cache_root.clone()));
    let mut test = context(&run_dirs, key, "IMB-MPI1");

    let err = hooks.before_run(&mut test).unwrap_err();
    assert!(matches!(err, ExtrasError::MissingCacheEntry { .. }));
    assert_eq!(test.executable, "IMB-MPI1");
    assert!(!run_dirs.stage_dir.join("noop.sh").exists());
}
