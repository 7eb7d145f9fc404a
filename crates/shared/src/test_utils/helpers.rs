use std::sync::Once;

pub fn get_workspace_root() -> String {
    let crate_root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    crate_root
        .parent() // up from crates/<name>
        .unwrap()
        .parent() // up from crates/
        .unwrap()
        .to_string_lossy()
        .to_string()
}

pub struct TestContext {
    pub workspace_root: String,
    pub crate_root: String,
}

pub static INIT_TEST_ONCE: Once = Once::new();

/// Configures crypto/env/logging once per test process, and points
/// `AMBASSADOR_DATA_DIR` at a per-test scratch directory under the
/// workspace root so parallel tests never collide on the same sqlite file.
#[macro_export]
macro_rules! setup_test {
    () => {{
        $crate::test_utils::helpers::INIT_TEST_ONCE.call_once(|| {
            $crate::crypto::configure_crypto_provider().unwrap();
            $crate::env::load_optional_env_files();
            $crate::logging::configure_logging().unwrap();
        });

        let crate_root = env!("CARGO_MANIFEST_DIR");
        let workspace_root = $crate::test_utils::helpers::get_workspace_root();
        let cur_thread = std::thread::current();
        let test_name = cur_thread.name().unwrap_or("unknown");
        let escaped_test_name = test_name
            .replace("::", "_")
            .replace(":", "_")
            .replace("/", "_")
            .replace("\\", "_");

        unsafe {
            std::env::set_var(
                "AMBASSADOR_DATA_DIR",
                format!("{}/target/test-data/{}", workspace_root, escaped_test_name),
            );
        }

        $crate::test_utils::helpers::TestContext {
            workspace_root,
            crate_root: crate_root.to_string(),
        }
    }};
}
