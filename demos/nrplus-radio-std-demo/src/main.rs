use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use env_logger::Builder;
use log::log;
use log::LevelFilter;
use nrplus_radio_lib::phy_device_loopback::PhyDevice;
use nrplus_radio_lib::LinkConfig;
use nrplus_radio_lib::PresenceReport;
use nrplus_radio_lib::RadioControlManager;
use nrplus_radio_lib::SessionEvent;
use nrplus_radio_lib::SessionPhase;
use nrplus_radio_lib::MODEM_TIME_TICK_RATE_KHZ;

const OWN_DEVICE_ID: u16 = 0x1234;

#[embassy_executor::task]
async fn session_event_logger(manager: &'static RadioControlManager) -> ! {
    loop {
        match manager.next_session_event().await {
            Ok(SessionEvent::PeerDiscovered { peer_id, slot }) => {
                log!(log::Level::Info, "Peer {} discovered in slot {}", peer_id, slot);
            }
            Ok(SessionEvent::LinkQualitySample { dbm, averaged }) => {
                log!(log::Level::Info, "Link sample: {} dBm (averaged: {})", dbm, averaged);
            }
            Err(_) => {
                log!(log::Level::Error, "Error receiving session event");
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    Builder::new().filter_level(LevelFilter::Debug).init();

    log!(log::Level::Debug, "Starting up");
    let phy_device: PhyDevice = PhyDevice::new();

    let mut radio_control_manager_temp = RadioControlManager::new();
    let link_config = LinkConfig {
        carrier: 1677,
        network_id: 91,
        transmit_power: 11,
        mcs: 1,
        // 200 ms receive windows
        receive_window_ticks: 200 * MODEM_TIME_TICK_RATE_KHZ,
        rssi_threshold_dbm: -60,
        harq_rx_expiry_time_us: 5_000_000,
        harq_rx_process_count: 4,
    };

    let mut session = match radio_control_manager_temp.initialize(link_config, spawner, phy_device, OWN_DEVICE_ID) {
        Ok(session) => session,
        Err(()) => {
            log!(log::Level::Error, "Error initializing radio control manager");
            return;
        }
    };
    log!(log::Level::Debug, "radio control manager started");
    let radio_control_manager: &'static RadioControlManager = Box::leak(Box::new(radio_control_manager_temp));

    spawner.spawn(session_event_logger(radio_control_manager)).unwrap();

    // Drive the session: announce once, press a button after the announce
    // has looped back, then wind down a few windows later.
    let mut receive_phases: u32 = 0;
    loop {
        let phase = session.step().await;
        log!(log::Level::Debug, "Session phase: {:?}", phase);

        if phase == SessionPhase::Terminated {
            break;
        }
        if phase != SessionPhase::Receive {
            continue;
        }
        receive_phases += 1;
        match receive_phases {
            1 => {
                let announce = PresenceReport {
                    transmitter_id: OWN_DEVICE_ID as u32,
                }
                .to_payload();
                match session.transmit_broadcast(announce).await {
                    Ok(status) if status.is_ok() => {
                        log!(log::Level::Info, "Announce broadcast, device id: {}", OWN_DEVICE_ID)
                    }
                    Ok(status) => log!(log::Level::Warn, "Announce failed, status: {}", status.0),
                    Err(error) => log!(log::Level::Error, "Could not submit announce: {:?}", error),
                }
            }
            2 => {
                // The looped-back announce registered us in slot 0, so
                // button 1 targets our own device id.
                if radio_control_manager.press_button(1).is_err() {
                    log!(log::Level::Error, "Error pressing button");
                }
            }
            5 => {
                session.request_stop();
            }
            _ => {}
        }
    }

    log!(
        log::Level::Info,
        "Session ended, average RSSI: {:.1} dBm over {} samples, CRC errors: {}",
        session.current_average_dbm(),
        session.link_sample_count(),
        session.crc_failure_count()
    );
    // Let the event logger drain before the process goes away.
    Timer::after(Duration::from_millis(100)).await;
    std::process::exit(0);
}
