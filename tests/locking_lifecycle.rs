// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use locker::error::LockerError;
use locker::locking::{DistributedLock, LockOutcome, MarkerMetadata, PollingBackoff};
use locker::storage::{CreateOutcome, DeleteOutcome, FsStore, ObjectInfo, ObjectStore};
use mockall::mock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

mock! {
    Store {}

    impl ObjectStore for Store {
        fn location(&self) -> String;
        fn create_if_absent(
            &self,
            key: &str,
            body: &[u8],
            budget: Option<Duration>,
        ) -> locker::error::Result<CreateOutcome>;
        fn delete<'a>(
            &self,
            key: &str,
            if_generation: Option<&'a str>,
            budget: Option<Duration>,
        ) -> locker::error::Result<DeleteOutcome>;
        fn stat(
            &self,
            key: &str,
            budget: Option<Duration>,
        ) -> locker::error::Result<Option<ObjectInfo>>;
    }
}

fn fs_lock(store: &Arc<FsStore>, name: &str) -> DistributedLock {
    DistributedLock::new(store.clone(), name)
        .unwrap()
        .with_backoff(PollingBackoff::new(
            Duration::from_millis(2),
            2,
            Duration::from_millis(20),
        ))
}

#[test]
fn marker_carries_holder_metadata() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsStore::new(temp.path()).unwrap());
    let lock = fs_lock(&store, "deploy");

    assert_eq!(lock.acquire(None).unwrap(), LockOutcome::Acquired);
    let payload = std::fs::read(temp.path().join("deploy")).unwrap();
    let metadata: MarkerMetadata = serde_json::from_slice(&payload).unwrap();
    assert_eq!(metadata.lock, "deploy");
    assert_eq!(metadata.pid, std::process::id());

    assert_eq!(lock.release(None).unwrap(), LockOutcome::Released);
    assert_eq!(lock.release(None).unwrap(), LockOutcome::Released);
}

#[test]
fn contending_threads_never_overlap() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsStore::new(temp.path()).unwrap());
    let inside = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let lock = fs_lock(&store, "shared");
            let inside = inside.clone();
            let completed = completed.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    assert_eq!(
                        lock.acquire(Some(Duration::from_secs(30))).unwrap(),
                        LockOutcome::Acquired
                    );
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.release(None).unwrap();
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 20);
    assert!(!temp.path().join("shared").exists());
}

#[test]
fn waiter_acquires_once_holder_releases() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsStore::new(temp.path()).unwrap());
    let holder = fs_lock(&store, "deploy");
    let waiter = fs_lock(&store, "deploy");

    holder.acquire(None).unwrap();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        holder.release(None).unwrap();
    });

    let started = Instant::now();
    assert_eq!(
        waiter.acquire(Some(Duration::from_secs(10))).unwrap(),
        LockOutcome::Acquired
    );
    assert!(started.elapsed() >= Duration::from_millis(90));
    releaser.join().unwrap();
}

#[test]
fn deadline_is_reported_not_raised() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsStore::new(temp.path()).unwrap());
    let holder = fs_lock(&store, "deploy");
    let waiter = fs_lock(&store, "deploy");
    holder.acquire(None).unwrap();

    let started = Instant::now();
    let outcome = waiter.acquire(Some(Duration::from_millis(200))).unwrap();
    assert!(outcome.is_deadline_exceeded());
    assert!(started.elapsed() < Duration::from_millis(800));
    assert!(temp.path().join("deploy").exists());
}

#[test]
fn marker_named_after_the_lock_blocks_acquire() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsStore::new(temp.path()).unwrap());
    std::fs::write(temp.path().join("deploy"), b"held elsewhere").unwrap();

    let lock = fs_lock(&store, "deploy");
    assert!(
        lock.acquire(Some(Duration::ZERO))
            .unwrap()
            .is_deadline_exceeded()
    );
    assert_eq!(
        std::fs::read(temp.path().join("deploy")).unwrap(),
        b"held elsewhere"
    );

    assert_eq!(lock.release(None).unwrap(), LockOutcome::Released);
    assert!(!temp.path().join("deploy").exists());
}

#[test]
fn abandoned_marker_is_taken_over_after_ttl() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsStore::new(temp.path()).unwrap());
    let marker = temp.path().join("deploy");
    std::fs::write(&marker, b"{}").unwrap();
    let old = SystemTime::now() - Duration::from_secs(3600);
    std::fs::File::options()
        .write(true)
        .open(&marker)
        .unwrap()
        .set_modified(old)
        .unwrap();

    let strict = fs_lock(&store, "deploy");
    assert!(
        strict
            .acquire(Some(Duration::ZERO))
            .unwrap()
            .is_deadline_exceeded()
    );

    let lenient = fs_lock(&store, "deploy").with_ttl(Some(Duration::from_secs(60)));
    assert_eq!(
        lenient.acquire(Some(Duration::from_secs(1))).unwrap(),
        LockOutcome::Acquired
    );
    let metadata: MarkerMetadata =
        serde_json::from_slice(&std::fs::read(&marker).unwrap()).unwrap();
    assert_eq!(metadata.lock, "deploy");
}

#[test]
fn invalid_lock_name_never_touches_the_backend() {
    let mut store = MockStore::new();
    store
        .expect_location()
        .return_const("gs://ci-locks".to_string());
    store.expect_create_if_absent().never();
    store.expect_delete().never();
    store.expect_stat().never();

    let err = DistributedLock::new(Arc::new(store), "   ").unwrap_err();
    assert!(matches!(err, LockerError::InvalidConfig(_)));
}

#[test]
fn scripted_contention_then_success() {
    let mut store = MockStore::new();
    store
        .expect_location()
        .return_const("gs://ci-locks".to_string());
    let mut responses = vec![
        Ok(CreateOutcome::Created {
            generation: "7".to_string(),
        }),
        Ok(CreateOutcome::Contended("HTTP 503".to_string())),
        Ok(CreateOutcome::Exists),
        Ok(CreateOutcome::Exists),
    ];
    store
        .expect_create_if_absent()
        .times(4)
        .returning(move |_, _, _| responses.pop().unwrap());

    let lock = DistributedLock::new(Arc::new(store), "deploy")
        .unwrap()
        .with_backoff(PollingBackoff::new(
            Duration::from_millis(1),
            2,
            Duration::from_millis(5),
        ));
    assert_eq!(lock.acquire(None).unwrap(), LockOutcome::Acquired);
}
