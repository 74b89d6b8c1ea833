//! Runs the `idevice_id` binary against the in-process fake daemon.

#![cfg(unix)]

use std::path::Path;
use std::process::Output;

use imd_runtime::testing::{FakeDevice, FakeMuxer};
use tempfile::TempDir;
use tokio::process::Command;

struct Fixture {
	dir: TempDir,
	muxer: FakeMuxer,
}

impl Fixture {
	async fn start(devices: Vec<FakeDevice>) -> anyhow::Result<Self> {
		let dir = tempfile::tempdir()?;
		let muxer = FakeMuxer::start(dir.path().join("usbmuxd.sock"), devices).await?;
		Ok(Self { dir, muxer })
	}

	fn socket(&self) -> std::path::PathBuf {
		self.dir.path().join("usbmuxd.sock")
	}

	async fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
		run_against(&self.socket(), args).await
	}
}

async fn run_against(socket: &Path, args: &[&str]) -> anyhow::Result<Output> {
	let output = Command::new(env!("CARGO_BIN_EXE_idevice_id"))
		.args(args)
		.env("USBMUXD_SOCKET_ADDRESS", format!("UNIX:{}", socket.display()))
		.env_remove("IMD_PAIR_RECORD_DIR")
		.env_remove("RUST_LOG")
		.output()
		.await?;
	Ok(output)
}

fn stdout(output: &Output) -> String {
	String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
	String::from_utf8_lossy(&output.stderr).to_string()
}

fn devices() -> Vec<FakeDevice> {
	vec![
		FakeDevice::usb(1, "A").with_root_value("DeviceName", "Alice's Phone"),
		FakeDevice::network(2, "A").with_root_value("DeviceName", "Alice's Phone"),
		FakeDevice::usb(3, "B").with_root_value("DeviceName", "Bob's Pad"),
	]
}

#[tokio::test]
async fn test_list_usb_prints_udids() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["-l"]).await?;
	assert!(output.status.success(), "stderr: {}", stderr(&output));
	assert_eq!(stdout(&output), "A\nB\n");
	Ok(())
}

#[tokio::test]
async fn test_list_network_only() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["--network"]).await?;
	assert_eq!(stdout(&output), "A\n");
	Ok(())
}

#[tokio::test]
async fn test_both_transports_get_suffixes() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["-l", "-n"]).await?;
	assert_eq!(stdout(&output), "A (USB)\nA (Network)\nB (USB)\n");
	Ok(())
}

#[tokio::test]
async fn test_bare_invocation_dumps_usb_root_domains() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&[]).await?;
	assert!(output.status.success(), "stderr: {}", stderr(&output));
	assert_eq!(stdout(&output), "DeviceName: Alice's Phone\nDeviceName: Bob's Pad\n");
	Ok(())
}

#[tokio::test]
async fn test_full_listing_with_single_key() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["-l", "-f", "--key", "DeviceName"]).await?;
	assert_eq!(stdout(&output), "Alice's Phone\nBob's Pad\n");
	Ok(())
}

#[tokio::test]
async fn test_unknown_domain_warns_and_continues() -> anyhow::Result<()> {
	let fixture = Fixture::start(vec![FakeDevice::usb(1, "A").with_empty_domain("com.unknown.vendor")]).await?;

	let output = fixture.run(&["-l", "-f", "--domain", "com.unknown.vendor"]).await?;
	assert!(output.status.success());
	assert!(stderr(&output).contains("unknown domain"), "stderr: {}", stderr(&output));
	assert_eq!(stdout(&output), "\n");
	Ok(())
}

#[tokio::test]
async fn test_unreadable_details_fall_back_to_udid() -> anyhow::Result<()> {
	let fixture = Fixture::start(vec![FakeDevice::usb(1, "A").unpaired()]).await?;

	let output = fixture.run(&["-l", "-f"]).await?;
	assert!(output.status.success());
	assert_eq!(stdout(&output), "A\n");
	assert!(stderr(&output).contains("not paired"), "stderr: {}", stderr(&output));
	Ok(())
}

#[tokio::test]
async fn test_udid_prints_device_name() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["B"]).await?;
	assert!(output.status.success(), "stderr: {}", stderr(&output));
	assert_eq!(stdout(&output), "Bob's Pad\n");
	assert!(fixture.muxer.wait_for_tunnels_closed().await);
	Ok(())
}

#[tokio::test]
async fn test_unknown_udid_exits_254() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["C"]).await?;
	assert_eq!(output.status.code(), Some(254));
	assert!(stderr(&output).contains("ERROR: No device with UDID C attached."));
	assert!(stdout(&output).is_empty());
	Ok(())
}

#[tokio::test]
async fn test_missing_name_exits_254() -> anyhow::Result<()> {
	let fixture = Fixture::start(vec![FakeDevice::usb(1, "A")]).await?;

	let output = fixture.run(&["A"]).await?;
	assert_eq!(output.status.code(), Some(254));
	assert!(stderr(&output).contains("ERROR: Could not get device name!"));
	Ok(())
}

#[tokio::test]
async fn test_missing_daemon_exits_255() -> anyhow::Result<()> {
	let dir = tempfile::tempdir()?;

	let output = run_against(&dir.path().join("absent.sock"), &["-l"]).await?;
	assert_eq!(output.status.code(), Some(255));
	assert!(stderr(&output).contains("ERROR: Unable to retrieve device list!"));
	Ok(())
}

#[tokio::test]
async fn test_json_listing() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["--json", "-l", "-n", "-f", "--key", "DeviceName"]).await?;
	let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
	assert_eq!(parsed["ok"], true);
	assert_eq!(parsed["command"], "list");
	let data = parsed["data"].as_array().expect("data array");
	assert_eq!(data.len(), 3);
	assert_eq!(data[1]["transport"], "Network");
	assert_eq!(data[2]["details"], "Bob's Pad");
	Ok(())
}

#[tokio::test]
async fn test_json_failure_envelope() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;

	let output = fixture.run(&["--json", "C"]).await?;
	assert_eq!(output.status.code(), Some(254));
	let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
	assert_eq!(parsed["ok"], false);
	assert_eq!(parsed["error"]["code"], "DEVICE_NOT_FOUND");
	Ok(())
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_unwritable_stdout_fails() -> anyhow::Result<()> {
	let fixture = Fixture::start(devices()).await?;
	let full = std::fs::OpenOptions::new().write(true).open("/dev/full")?;

	let output = Command::new(env!("CARGO_BIN_EXE_idevice_id"))
		.arg("-l")
		.env("USBMUXD_SOCKET_ADDRESS", format!("UNIX:{}", fixture.socket().display()))
		.env_remove("RUST_LOG")
		.stdout(std::process::Stdio::from(full))
		.output()
		.await?;
	assert_eq!(output.status.code(), Some(1));
	assert!(stderr(&output).contains("ERROR:"), "stderr: {}", stderr(&output));
	Ok(())
}
