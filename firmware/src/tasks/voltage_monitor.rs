//! 電圧監視タスク
//!
//! DCバス電圧を計測してモーターコアへ公開し、過電圧/低電圧を通知します。
//! 電圧異常でのdisarmは電流計測ごとの高速チェックが行います。

use core::sync::atomic::Ordering;

use embassy_stm32::{
    adc::{Adc, AnyAdcChannel},
    peripherals,
};
use embassy_time::{Duration, Ticker};

use crate::config::vbus;
use crate::state::{VBUS_VOLTAGE, VOLTAGE_FAULT};
use crate::voltage_monitor::{VoltageMonitor, VoltageMonitorConfig};

/// ログ出力の間引き（1秒ごと）
const LOG_INTERVAL: u32 = (1000 / vbus::PERIOD_MS) as u32;

#[embassy_executor::task]
pub async fn voltage_monitor_task(
    mut adc: Adc<'static, peripherals::ADC2>,
    mut voltage_pin: AnyAdcChannel<peripherals::ADC2>,
) {
    info!("Voltage monitor task started");

    let mut monitor = VoltageMonitor::new(VoltageMonitorConfig::default());

    let initial_adc = adc.blocking_read(&mut voltage_pin);
    let state = monitor.initialize_with_adc(initial_adc);
    VBUS_VOLTAGE.store(state.voltage);
    info!(
        "Initial voltage: {}V (ADC raw: {}), OV={}V, UV={}V",
        state.voltage,
        initial_adc,
        vbus::OVERVOLTAGE,
        vbus::UNDERVOLTAGE
    );

    let mut ticker = Ticker::every(Duration::from_millis(vbus::PERIOD_MS));
    let mut log_counter = 0u32;
    let mut was_ok = state.is_voltage_ok();

    loop {
        ticker.next().await;

        let adc_raw = adc.blocking_read(&mut voltage_pin);
        let state = monitor.update(adc_raw);

        VBUS_VOLTAGE.store(state.voltage);
        VOLTAGE_FAULT.store(!state.is_voltage_ok(), Ordering::Relaxed);

        if was_ok && !state.is_voltage_ok() {
            error!(
                "Voltage fault: {}V, OV={}, UV={}",
                state.voltage, state.overvoltage, state.undervoltage
            );
        } else if !was_ok && state.is_voltage_ok() {
            info!("Voltage back in range: {}V", state.voltage);
        }
        was_ok = state.is_voltage_ok();

        log_counter += 1;
        if log_counter >= LOG_INTERVAL {
            log_counter = 0;
            debug!("[Voltage] raw={}, V_bus={}V", adc_raw, state.voltage);
        }
    }
}
