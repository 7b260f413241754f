//! The shipped sample settings load and drive a simulated system.

use std::sync::Arc;
use std::time::Duration;

use rust_labdaq::config::{DeviceKind, LogFormat, Settings};
use rust_labdaq::hardware::mock::{SimBus, SimDirectory};
use rust_labdaq::Application;

#[test]
fn test_sample_settings_load() {
    let settings = Settings::load_from(Settings::DEFAULT_PATH).unwrap();
    assert_eq!(settings.application.log_format, LogFormat::Text);
    assert_eq!(settings.bus.under_voltage_code, 0x3220);
    assert_eq!(settings.devices.len(), 5);
    assert_eq!(settings.devices[2].kind, DeviceKind::AxisSystem);
    assert!(settings.server.encryption.is_none());
    assert_eq!(settings.publisher.relative_tolerance, 1e-3);
    assert_eq!(settings.publisher.signal_tolerance, 3e-3);
    assert_eq!(settings.tracker.execution_retention, Duration::from_secs(600));
}

#[tokio::test(start_paused = true)]
async fn test_sample_settings_start_a_simulated_system() {
    let settings = Settings::load_from(Settings::DEFAULT_PATH).unwrap();
    let directory = SimDirectory::for_devices(&settings.devices);
    let app = Application::new(settings, Arc::new(SimBus::new()), &directory).unwrap();

    let devices: Vec<&str> = app.devices().iter().map(|d| d.endpoint.device.as_str()).collect();
    assert_eq!(
        devices,
        vec!["neMESYS_1_Pump", "neMESYS_2_Pump", "Rotaxys", "QmixTC", "Nemesys_IO"]
    );
    app.shutdown().await.unwrap();
}
