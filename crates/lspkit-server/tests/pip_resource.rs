//! Virtualenv lifecycle with a fake interpreter
//!
//! The fake `python3` creates a `bin/pip` script when asked for a venv; that
//! pip records the requirements file as its `freeze` output.

#![cfg(unix)]

use lspkit_server::{InstallLocks, PipServerResource, ServerResource, ServerStatus};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FAKE_PYTHON: &str = r#"#!/bin/sh
case "$1" in
  --version)
    echo "Python 3.11.4"
    ;;
  -m)
    name="$3"
    mkdir -p "$name/bin"
    cat > "$name/bin/pip" <<'PIP'
#!/bin/sh
bindir=$(dirname "$0")
case "$1" in
  install)
    cp "$3" "$bindir/../freeze.txt"
    printf '#!/bin/sh\n' > "$bindir/pylsp"
    chmod +x "$bindir/pylsp"
    echo "Successfully installed"
    ;;
  freeze)
    cat "$bindir/../freeze.txt"
    ;;
esac
PIP
    chmod +x "$name/bin/pip"
    ;;
esac
"#;

fn script(path: &Path, content: &str) -> PathBuf {
    std::fs::write(path, content).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_path_buf()
}

struct Fixture {
    dir: TempDir,
    resource: PipServerResource,
}

impl Fixture {
    fn requirements(&self) -> PathBuf {
        self.dir.path().join("requirements.txt")
    }
}

fn fixture(python_body: &str) -> Fixture {
    let dir = TempDir::new().unwrap();
    let python = script(&dir.path().join("python3"), python_body);
    let storage = dir.path().join("packages");
    std::fs::create_dir_all(&storage).unwrap();
    std::fs::write(
        dir.path().join("requirements.txt"),
        "python-lsp-server==1.10.0\n",
    )
    .unwrap();

    let resource = PipServerResource::new(
        &storage,
        "LSP-pylsp",
        dir.path().join("requirements.txt"),
        "pylsp",
        Arc::new(InstallLocks::new()),
    )
    .with_python(python);
    Fixture { dir, resource }
}

#[tokio::test]
async fn install_then_up_to_date() {
    let fx = fixture(FAKE_PYTHON);
    assert!(fx.resource.needs_installation().await);

    fx.resource
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fx.resource.get_status(), ServerStatus::Ready);
    assert!(fx.resource.binary_path().is_file());
    assert_eq!(
        std::fs::read_to_string(fx.resource.basedir().join("python_version")).unwrap(),
        "Python 3.11.4"
    );
    assert!(!fx.resource.needs_installation().await);
}

#[tokio::test]
async fn changed_pin_needs_installation() {
    let fx = fixture(FAKE_PYTHON);
    fx.resource
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();

    std::fs::write(fx.requirements(), "python-lsp-server==1.11.0\n").unwrap();
    assert!(fx.resource.needs_installation().await);
}

#[tokio::test]
async fn changed_interpreter_needs_installation() {
    let fx = fixture(FAKE_PYTHON);
    fx.resource
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();

    std::fs::write(fx.resource.basedir().join("python_version"), "Python 3.8.10").unwrap();
    assert!(fx.resource.needs_installation().await);
}

#[tokio::test]
async fn failed_venv_creation_cleans_up() {
    let fx = fixture("#!/bin/sh\necho 'No module named venv' >&2\nexit 1\n");

    let err = fx
        .resource
        .install_or_update(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("No module named venv"));
    assert_eq!(fx.resource.get_status(), ServerStatus::Error);
    assert!(!fx.resource.basedir().exists());
}

#[tokio::test]
async fn held_install_lock_is_not_reported_ready() {
    let fx = fixture(FAKE_PYTHON);
    fx.resource
        .install_or_update(CancellationToken::new())
        .await
        .unwrap();

    // Another resource for the same package is mid-install
    let locks = Arc::new(InstallLocks::new());
    let resource = PipServerResource::new(
        &fx.dir.path().join("packages"),
        "LSP-pylsp",
        fx.requirements(),
        "pylsp",
        Arc::clone(&locks),
    )
    .with_python(fx.dir.path().join("python3"));
    let guard = locks.acquire("LSP-pylsp").await;

    assert!(resource.needs_installation().await);
    assert_eq!(resource.get_status(), ServerStatus::Uninitialized);

    drop(guard);
    assert!(!resource.needs_installation().await);
    assert_eq!(resource.get_status(), ServerStatus::Ready);
}
