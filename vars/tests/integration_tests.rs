//! Integration tests for the reef variable engine
//!
//! These drive full `EnvStack` instances the way the shell runtime does:
//! initialization from the process environment, scope push/pop around
//! simulated function calls, universal-variable convergence between two
//! independent stacks sharing one store file, and snapshots handed to a
//! worker thread.

use std::thread;

use reef_uvar::{FileStore, UvarSynchronizer};
use reef_vars::{ConfigPaths, EnvError, EnvMode, EnvStack, HIGHLIGHTING_KEYS};

fn stack_on(path: &std::path::Path) -> EnvStack {
    EnvStack::with_universal(UvarSynchronizer::with_store(FileStore::new(path)))
}

#[test]
fn init_establishes_well_known_variables() {
    let paths = ConfigPaths {
        data: "/usr/local/share".into(),
        sysconf: "/usr/local/etc".into(),
        doc: "/usr/local/share/doc/reef".into(),
        bin: "/usr/local/bin".into(),
    };
    let mut env = EnvStack::new();
    env.init(Some(&paths));

    assert!(!env.get("version", EnvMode::empty()).is_missing());
    assert_eq!(
        env.get("__reef_datadir", EnvMode::empty()).as_string(),
        "/usr/local/share"
    );

    let shlvl: u64 = env
        .get("SHLVL", EnvMode::empty())
        .as_string()
        .parse()
        .expect("SHLVL is numeric");
    assert!(shlvl >= 1);

    let cwd = std::env::current_dir().unwrap().display().to_string();
    assert_eq!(env.get("PWD", EnvMode::empty()).as_string(), cwd);
    assert!(env.pwd_slash().ends_with('/'));

    // version is read-only for the user, writable for internal code.
    assert_eq!(
        env.set("version", EnvMode::USER, "9.9").unwrap_err(),
        EnvError::Perm("version".to_string())
    );
}

#[test]
fn imported_path_round_trips_through_export_array() {
    // Only meaningful when the test process itself has a PATH.
    if std::env::var("PATH").is_err() {
        return;
    }
    let mut env = EnvStack::new();
    env.init(None);

    let elements = env.get("PATH", EnvMode::empty()).to_list();
    assert!(!elements.is_empty());

    let path_entry = env
        .export_array()
        .iter()
        .map(|c| c.to_str().unwrap().to_string())
        .find(|e| e.starts_with("PATH="))
        .expect("PATH is exported");
    assert_eq!(path_entry, format!("PATH={}", elements.join(":")));
}

#[test]
fn function_call_scoping_end_to_end() {
    let mut env = EnvStack::new();
    env.set("x", EnvMode::GLOBAL, "global").unwrap();

    // Enter a function body.
    env.push(true);
    env.set("x", EnvMode::LOCAL, "function").unwrap();
    env.set_argv(&["a".to_string(), "b".to_string()]);
    assert_eq!(env.get("x", EnvMode::empty()).as_string(), "function");

    // A loop inside the function shares its bindings.
    env.push(false);
    assert_eq!(env.get("x", EnvMode::empty()).as_string(), "function");
    env.set("x", EnvMode::empty(), "loop-update").unwrap();
    env.pop();
    assert_eq!(env.get("x", EnvMode::empty()).as_string(), "loop-update");

    env.pop();
    assert_eq!(env.get("x", EnvMode::empty()).as_string(), "global");
}

#[test]
fn universal_variables_converge_between_stacks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("universal.vars");
    let mut a = stack_on(&path);
    let mut b = stack_on(&path);

    a.set("ufoo", EnvMode::UNIVERSAL, "1").unwrap();
    b.set("ubar", EnvMode::UNIVERSAL, "2").unwrap();

    a.universal_barrier();
    b.universal_barrier();
    a.universal_barrier();

    for env in [&a, &b] {
        assert_eq!(env.get("ufoo", EnvMode::empty()).as_string(), "1");
        assert_eq!(env.get("ubar", EnvMode::empty()).as_string(), "2");
    }
}

#[test]
fn conflicting_universal_writes_pick_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("universal.vars");
    let mut a = stack_on(&path);
    let mut b = stack_on(&path);

    a.set("shared", EnvMode::UNIVERSAL, "from-a").unwrap();
    b.set("shared", EnvMode::UNIVERSAL, "from-b").unwrap();

    a.universal_barrier();
    b.universal_barrier();
    a.universal_barrier();

    let winner = a.get("shared", EnvMode::empty()).as_string();
    assert_eq!(b.get("shared", EnvMode::empty()).as_string(), winner);
    assert_eq!(winner, "from-b");
}

#[test]
fn universal_variables_persist_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("universal.vars");

    {
        let mut env = stack_on(&path);
        env.set("sticky", EnvMode::UNIVERSAL | EnvMode::EXPORT, "v").unwrap();
        env.universal_barrier();
    }

    let mut env = stack_on(&path);
    env.universal_barrier();
    let var = env.get("sticky", EnvMode::empty());
    assert_eq!(var.as_string(), "v");
    assert!(var.exported);
}

#[test]
fn corrupt_store_degrades_to_session_local() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("universal.vars");
    std::fs::write(&path, "this is not a universal variable store\n").unwrap();

    let mut env = stack_on(&path);
    env.set("u", EnvMode::UNIVERSAL, "still works").unwrap();
    env.universal_barrier();

    assert!(env.universal_is_degraded());
    assert_eq!(env.get("u", EnvMode::empty()).as_string(), "still works");

    // The session stays usable, it just stopped syncing.
    env.set("u2", EnvMode::UNIVERSAL, "also works").unwrap();
    env.universal_barrier();
    assert_eq!(env.get("u2", EnvMode::empty()).as_string(), "also works");
}

#[test]
fn remote_universal_change_refreshes_export_array() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("universal.vars");
    let mut a = stack_on(&path);
    let mut b = stack_on(&path);

    a.set("UEXP", EnvMode::UNIVERSAL | EnvMode::EXPORT, "old").unwrap();
    a.universal_barrier();
    b.universal_barrier();
    assert!(b
        .export_array()
        .iter()
        .any(|c| c.to_str().unwrap() == "UEXP=old"));

    a.set("UEXP", EnvMode::UNIVERSAL | EnvMode::EXPORT, "new").unwrap();
    a.universal_barrier();
    b.universal_barrier();
    assert!(b
        .export_array()
        .iter()
        .any(|c| c.to_str().unwrap() == "UEXP=new"));
}

#[test]
fn snapshot_travels_to_a_worker_thread() {
    let mut env = EnvStack::new();
    env.set("PATH", EnvMode::GLOBAL | EnvMode::EXPORT, "/bin").unwrap();
    env.set("HOME", EnvMode::GLOBAL, "/home/tester").unwrap();

    let snap = env.snapshot(Some(HIGHLIGHTING_KEYS));

    // Mutations after the copy are invisible to the worker.
    env.set("PATH", EnvMode::GLOBAL, "/changed").unwrap();

    let worker = thread::spawn(move || {
        assert_eq!(snap.get("PATH").as_string(), "/bin");
        assert_eq!(snap.get("HOME").as_string(), "/home/tester");
        assert!(snap.get("CDPATH").is_missing());
    });
    worker.join().unwrap();
}
