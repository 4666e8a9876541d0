use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use genred_rs::compiler::CompileError;
use genred_rs::{
    BuildCache, BuildConfig, BuildFolder, BuildType, CacheError, DependencyProbe, Error,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn never_resolvable() -> Arc<dyn DependencyProbe> {
    Arc::new(|_name: &str| None::<PathBuf>)
}

fn always_resolvable() -> Arc<dyn DependencyProbe> {
    Arc::new(|name: &str| Some(PathBuf::from(format!("/installed/{name}"))))
}

fn folder(root: &Path, build_type: BuildType) -> BuildFolder {
    let config = BuildConfig::new(root).with_build_type(build_type);
    BuildFolder::for_kernel(&config, "libgenred_numpy_test")
}

#[test]
fn concurrent_builds_of_one_folder_never_overlap() -> Result<()> {
    init_logging();
    let root = tempfile::tempdir()?;
    let config = BuildConfig::new(root.path()).with_build_type(BuildType::Debug);
    let cache = BuildCache::new(&config, never_resolvable());
    let folder = BuildFolder::for_kernel(&config, "libgenred_numpy_contended");

    const WORKERS: usize = 6;
    let windows = Mutex::new(Vec::new());
    let active = AtomicUsize::new(0);
    let max_active = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..WORKERS {
            scope.spawn(|| {
                cache
                    .compile_guarded(&folder, || {
                        let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now_active, Ordering::SeqCst);
                        let start = Instant::now();
                        thread::sleep(Duration::from_millis(25));
                        let end = Instant::now();
                        active.fetch_sub(1, Ordering::SeqCst);
                        windows
                            .lock()
                            .expect("window log poisoned")
                            .push((start, end));
                        Ok::<_, CacheError>(())
                    })
                    .expect("guarded build succeeds");
            });
        }
    });

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    let mut windows = windows.into_inner().expect("window log poisoned");
    assert_eq!(windows.len(), WORKERS);
    windows.sort_by_key(|(start, _)| *start);
    for pair in windows.windows(2) {
        let (_, previous_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(
            previous_end <= next_start,
            "build windows overlap: {pair:?}"
        );
    }
    Ok(())
}

#[test]
fn different_folders_build_concurrently() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = BuildConfig::new(root.path()).with_build_type(BuildType::Debug);
    let cache = BuildCache::new(&config, never_resolvable());
    let first = BuildFolder::for_kernel(&config, "libgenred_numpy_first");
    let second = BuildFolder::for_kernel(&config, "libgenred_numpy_second");

    let _held = cache.lock(&first)?;
    let result = cache.compile_guarded(&second, || Ok::<_, CacheError>(42))?;
    assert_eq!(result, 42);
    Ok(())
}

#[test]
fn failed_build_propagates_error_and_releases_lock() -> Result<()> {
    let root = tempfile::tempdir()?;
    let cache = BuildCache::new(&BuildConfig::new(root.path()), always_resolvable());
    let folder = folder(root.path(), BuildType::Release);

    let err = cache
        .compile_guarded(&folder, || -> Result<(), Error> {
            Err(CompileError::other("nvcc: syntax error").into())
        })
        .expect_err("build failure must surface");
    assert!(matches!(
        err,
        Error::Compile(CompileError::Other(ref message)) if message == "nvcc: syntax error"
    ));

    assert!(folder.path.exists(), "failed builds are not cleaned up");
    let relocked = cache.try_lock(&folder)?;
    assert!(relocked.is_some(), "lock must be free after a failed build");
    Ok(())
}

#[test]
fn panicking_build_releases_lock() -> Result<()> {
    let root = tempfile::tempdir()?;
    let cache = BuildCache::new(&BuildConfig::new(root.path()), never_resolvable());
    let folder = folder(root.path(), BuildType::Release);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = cache.compile_guarded(&folder, || -> Result<(), CacheError> {
            panic!("compiler crashed")
        });
    }));
    assert!(outcome.is_err());
    assert!(cache.try_lock(&folder)?.is_some());
    Ok(())
}

#[test]
fn held_lock_blocks_other_handles() -> Result<()> {
    let root = tempfile::tempdir()?;
    let cache = BuildCache::new(&BuildConfig::new(root.path()), never_resolvable());
    let folder = folder(root.path(), BuildType::Release);

    let held = cache.lock(&folder)?;
    assert!(held.path().ends_with("genred_build.lock"));
    assert!(cache.try_lock(&folder)?.is_none());
    drop(held);
    assert!(cache.try_lock(&folder)?.is_some());
    Ok(())
}

#[test]
fn waiting_builder_proceeds_once_the_holder_finishes() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = BuildConfig::new(root.path()).with_build_type(BuildType::Debug);
    let cache = BuildCache::new(&config, never_resolvable());
    let folder = BuildFolder::for_kernel(&config, "libgenred_torch_waiter");

    let held = cache.lock(&folder)?;
    let released_at = thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            cache
                .compile_guarded(&folder, || Ok::<_, CacheError>(Instant::now()))
                .expect("waiter builds")
        });
        thread::sleep(Duration::from_millis(50));
        let released_at = Instant::now();
        drop(held);
        let started_at = waiter.join().expect("waiter thread");
        assert!(started_at >= released_at);
        released_at
    });
    assert!(released_at.elapsed() < Duration::from_secs(30));
    Ok(())
}

#[test]
fn release_build_discards_folder_once_resolvable() -> Result<()> {
    let root = tempfile::tempdir()?;
    let cache = BuildCache::new(&BuildConfig::new(root.path()), always_resolvable());
    let folder = folder(root.path(), BuildType::Release);

    let value = cache.compile_guarded(&folder, || {
        fs::write(folder.path.join("kernel.o"), b"object")
            .map_err(|source| CacheError::Io {
                path: folder.path.clone(),
                source,
            })?;
        Ok::<_, CacheError>("built")
    })?;
    assert_eq!(value, "built");
    assert!(!folder.path.exists());
    Ok(())
}

#[test]
fn debug_build_keeps_folder_and_artifacts() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = BuildConfig::new(root.path()).with_build_type(BuildType::Debug);
    let cache = BuildCache::new(&config, always_resolvable());
    let folder = folder(root.path(), BuildType::Debug);

    cache.compile_guarded(&folder, || {
        fs::write(folder.path.join("kernel.o"), b"object").map_err(|source| CacheError::Io {
            path: folder.path.clone(),
            source,
        })
    })?;
    assert!(folder.path.join("kernel.o").is_file());
    assert!(cache.lock_path(&folder).is_file());
    Ok(())
}

#[test]
fn release_build_keeps_folder_when_kernel_is_not_resolvable() -> Result<()> {
    let root = tempfile::tempdir()?;
    let cache = BuildCache::new(&BuildConfig::new(root.path()), never_resolvable());
    let folder = folder(root.path(), BuildType::Release);

    cache.compile_guarded(&folder, || Ok::<_, CacheError>(()))?;
    assert!(folder.path.is_dir());
    Ok(())
}

#[test]
fn cleanup_tolerates_folder_already_removed() -> Result<()> {
    let root = tempfile::tempdir()?;
    let cache = BuildCache::new(&BuildConfig::new(root.path()), always_resolvable());
    let folder = folder(root.path(), BuildType::Release);

    let value = cache.compile_guarded(&folder, || {
        fs::remove_dir_all(&folder.path).map_err(|source| CacheError::Io {
            path: folder.path.clone(),
            source,
        })?;
        Ok::<_, CacheError>(7)
    })?;
    assert_eq!(value, 7);
    assert!(!folder.path.exists());

    cache.compile_guarded(&folder, || Ok::<_, CacheError>(()))?;
    assert!(!folder.path.exists());
    Ok(())
}

#[test]
fn waiter_on_a_removed_lock_file_relocks_a_fresh_one() -> Result<()> {
    init_logging();
    let root = tempfile::tempdir()?;
    let config = BuildConfig::new(root.path()).with_build_type(BuildType::Debug);
    let cache = BuildCache::new(&config, never_resolvable());
    let folder = BuildFolder::for_kernel(&config, "libgenred_numpy_removed");

    let held = cache.lock(&folder)?;
    let (started_tx, started_rx) = mpsc::channel();
    thread::scope(|scope| -> Result<()> {
        let (cache, folder) = (&cache, &folder);
        let waiter = scope.spawn(move || {
            cache.compile_guarded(folder, || {
                let lock_file_present = cache.lock_path(folder).is_file();
                started_tx.send(()).expect("test thread is listening");
                thread::sleep(Duration::from_millis(300));
                Ok::<_, CacheError>(lock_file_present)
            })
        });
        thread::sleep(Duration::from_millis(50));
        // Removal under the lock, as a Release cleanup does.
        fs::remove_dir_all(&folder.path)?;
        drop(held);

        started_rx.recv_timeout(Duration::from_secs(30))?;
        assert!(
            cache.try_lock(folder)?.is_none(),
            "the waiter must hold the lock reachable at the folder path"
        );
        let lock_file_present = waiter.join().expect("waiter thread")?;
        assert!(lock_file_present, "the waiter built in a removed folder");
        Ok(())
    })?;
    assert!(folder.path.is_dir());
    Ok(())
}

#[test]
fn release_builds_racing_with_cleanup_never_overlap() -> Result<()> {
    init_logging();
    let root = tempfile::tempdir()?;
    let config = BuildConfig::new(root.path());
    let cache = BuildCache::new(&config, always_resolvable());
    let folder = BuildFolder::for_kernel(&config, "libgenred_numpy_cleaned");

    const WORKERS: usize = 6;
    let active = AtomicUsize::new(0);
    let max_active = AtomicUsize::new(0);
    let orphaned = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..WORKERS {
            scope.spawn(|| {
                cache
                    .compile_guarded(&folder, || {
                        let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now_active, Ordering::SeqCst);
                        if !cache.lock_path(&folder).is_file() {
                            orphaned.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, CacheError>(())
                    })
                    .expect("guarded build succeeds");
            });
        }
    });

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert_eq!(orphaned.load(Ordering::SeqCst), 0);
    assert!(!folder.path.exists());
    Ok(())
}

#[test]
fn locking_gives_up_when_the_lock_file_keeps_missing() -> Result<()> {
    let root = tempfile::tempdir()?;
    let config = BuildConfig::new(root.path()).with_lock_file_name("missing/genred_build.lock");
    let cache = BuildCache::new(&config, never_resolvable());
    let folder = BuildFolder::for_kernel(&config, "libgenred_numpy_unlockable");

    let err = cache.lock(&folder).expect_err("lock file can never be created");
    assert!(matches!(
        err,
        CacheError::Io { ref path, ref source }
            if path == &cache.lock_path(&folder) && source.kind() == io::ErrorKind::NotFound
    ));
    let err = cache.try_lock(&folder).expect_err("lock file can never be created");
    assert!(matches!(err, CacheError::Io { .. }));
    assert!(folder.path.is_dir());
    Ok(())
}
