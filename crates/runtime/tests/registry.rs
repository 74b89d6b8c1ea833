//! Registry tests against the in-process fake daemon.

#![cfg(unix)]

use imd_protocol::{LockdownRequest, MuxResult, PropertyValue};
use imd_runtime::testing::{FakeDevice, FakeMuxer, TEST_SYSTEM_BUID, TRUSTED_HOST_ID};
use imd_runtime::{
	Config, DeviceIdentifier, DeviceRegistry, Error, LockdownTransport, MuxerAddress, RegistryEntry, TransportKind,
};

async fn start(devices: Vec<FakeDevice>) -> (tempfile::TempDir, FakeMuxer) {
	let dir = tempfile::tempdir().unwrap();
	let muxer = FakeMuxer::start(dir.path().join("usbmuxd.sock"), devices)
		.await
		.unwrap();
	(dir, muxer)
}

fn id(udid: &str) -> DeviceIdentifier {
	DeviceIdentifier::new(udid).unwrap()
}

#[tokio::test]
async fn test_enumerate_snapshot() {
	let (_dir, muxer) = start(vec![
		FakeDevice::usb(1, "A"),
		FakeDevice::network(2, "A"),
		FakeDevice::usb(3, "B"),
		FakeDevice::usb(4, "B"),
	])
	.await;
	let registry = DeviceRegistry::new(muxer.config());

	let list = registry.enumerate().await.unwrap();
	assert_eq!(list.len(), 3);

	let entries: Vec<RegistryEntry> = list.collect();
	assert_eq!(entries[0].device_id, 1);
	assert_eq!(entries[1].transport, TransportKind::Network);
	assert_eq!(entries[2].device_id, 3, "first record for a pair wins");

	// Every call takes a fresh snapshot.
	registry.enumerate().await.unwrap();
	let listings = muxer
		.stats()
		.requests()
		.into_iter()
		.filter(|r| r == "ListDevices")
		.count();
	assert_eq!(listings, 2);
}

#[tokio::test]
async fn test_resolve_filters_and_orders() {
	let (_dir, muxer) = start(vec![FakeDevice::network(2, "A"), FakeDevice::usb(1, "A")]).await;
	let registry = DeviceRegistry::new(muxer.config());

	let all = registry
		.resolve(&id("A"), imd_runtime::TransportSet::ALL)
		.await
		.unwrap();
	let kinds: Vec<_> = all.iter().map(|e| e.transport).collect();
	assert_eq!(kinds, vec![TransportKind::Usb, TransportKind::Network]);

	let none = registry
		.resolve(&id("Z"), imd_runtime::TransportSet::ALL)
		.await
		.unwrap();
	assert!(none.is_empty());
}

#[tokio::test]
async fn test_read_pair_record_from_daemon() {
	let (_dir, muxer) = start(vec![FakeDevice::usb(1, "A"), FakeDevice::usb(2, "B").unpaired()]).await;
	let registry = DeviceRegistry::new(muxer.config());

	let record = registry.read_pair_record(&id("A")).await.unwrap().unwrap();
	assert_eq!(record.host_id, TRUSTED_HOST_ID);
	assert_eq!(record.system_buid, TEST_SYSTEM_BUID);

	assert!(registry.read_pair_record(&id("B")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_read_pair_record_from_directory() {
	let (_dir, muxer) = start(vec![FakeDevice::usb(1, "A")]).await;
	let records = tempfile::tempdir().unwrap();

	let record = PropertyValue::Dictionary(
		[
			("HostID", PropertyValue::from("HOST-FROM-DISK")),
			("SystemBUID", PropertyValue::from("BUID-FROM-DISK")),
			("HostCertificate", PropertyValue::Data(b"cert".to_vec())),
			("HostPrivateKey", PropertyValue::Data(b"key".to_vec())),
			("DeviceCertificate", PropertyValue::Data(b"device".to_vec())),
		]
		.into_iter()
		.map(|(k, v)| (k.to_string(), v))
		.collect(),
	);
	std::fs::write(records.path().join("A.plist"), record.to_xml().unwrap()).unwrap();

	let registry = DeviceRegistry::new(muxer.config().with_pair_record_dir(records.path()));
	let loaded = registry.read_pair_record(&id("A")).await.unwrap().unwrap();
	assert_eq!(loaded.host_id, "HOST-FROM-DISK");
	assert_eq!(loaded.device_certificate, b"device");

	assert!(registry.read_pair_record(&id("B")).await.unwrap().is_none());
	assert!(!muxer.stats().requests().contains(&"ReadPairRecord".to_string()));
}

#[tokio::test]
async fn test_connect_to_detached_device_reports_muxer_result() {
	let (_dir, muxer) = start(vec![FakeDevice::usb(1, "A")]).await;
	let registry = DeviceRegistry::new(muxer.config());

	let mut entry = registry.enumerate().await.unwrap().next().unwrap();
	entry.device_id = 99;

	let err = match registry.connect(&entry, 62078).await {
		Ok(_) => panic!("connected to a detached device"),
		Err(err) => err,
	};
	assert!(
		matches!(
			err,
			Error::Muxer {
				request: "Connect",
				result: MuxResult::BadDevice
			}
		),
		"got {err:?}"
	);
}

#[tokio::test]
async fn test_missing_daemon_is_transport_unavailable() {
	let dir = tempfile::tempdir().unwrap();
	let config = Config::default().with_muxer(MuxerAddress::Unix(dir.path().join("absent.sock")));
	let registry = DeviceRegistry::new(config);

	let err = registry.enumerate().await.unwrap_err();
	assert!(matches!(err, Error::TransportUnavailable { .. }), "got {err:?}");
	assert!(err.is_retriable());
}

#[tokio::test]
async fn test_network_entry_with_address_connects_directly() {
	let (_dir, muxer) = start(vec![FakeDevice::network(2, "A").dialled_directly()]).await;
	let config = muxer.config();
	let port = config.lockdown_port;
	let registry = DeviceRegistry::new(config);

	let entry = registry.enumerate().await.unwrap().next().unwrap();
	assert_eq!(entry.network_address, Some(std::net::Ipv4Addr::LOCALHOST.into()));

	let stream = registry.connect(&entry, port).await.unwrap();
	let mut lockdown = LockdownTransport::new(stream);
	let reply = lockdown
		.exchange(&LockdownRequest::query_type("registry-test"))
		.await
		.unwrap();
	assert_eq!(reply.service_type(), Some(imd_protocol::lockdown::LOCKDOWN_SERVICE_TYPE));
	drop(lockdown);

	let stats = muxer.stats();
	assert_eq!(stats.direct_connections(), 1);
	assert!(!stats.requests().contains(&"Connect".to_string()));
	assert!(muxer.wait_for_tunnels_closed().await);
}
