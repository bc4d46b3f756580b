use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

/// Millisecond suffix keeping per-case logs from colliding across runs.
fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_aeh") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "aeh.exe" } else { "aeh" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve aeh binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("aeh-cli-cases");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("AEH_OUTPUT_FORMAT", "human")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute aeh command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let log_content = format!(
        "case={case_name}\nbin={}\nargs={args:?}\nstatus={}\n\
         ----- stdout -----\n{stdout}\n----- stderr -----\n{stderr}\n",
        bin_path.display(),
        output.status,
    );
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Write a config whose monitored and donor mounts are plain directories
/// under `root`, with quiet logging into `root/activity.jsonl`.
pub fn write_test_config(root: &Path) -> PathBuf {
    let home = root.join("lv_home");
    let data1 = root.join("lv_data1");
    let data2 = root.join("lv_data2");
    for dir in [&home, &data1, &data2] {
        fs::create_dir_all(dir).expect("create mount dir");
    }
    let config = format!(
        r#"dry_run = false

[monitor]
mount_path = "{home}"
volume_group = "aehtestvg"
logical_volume = "lv_home"
poll_interval_ms = 50

[cascade]
command_timeout_secs = 5
fallback_device = "/dev/aeh-test-missing"

[[cascade.donors]]
mount_path = "{data1}"
logical_volume = "lv_data1"

[[cascade.donors]]
mount_path = "{data2}"
logical_volume = "lv_data2"

[load]
enabled = false

[logging]
echo_stderr = false

[paths]
jsonl_log = "{log}"
"#,
        home = home.display(),
        data1 = data1.display(),
        data2 = data2.display(),
        log = root.join("activity.jsonl").display(),
    );
    let path = root.join("config.toml");
    fs::write(&path, config).expect("write test config");
    path
}
