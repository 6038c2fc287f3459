#![no_std]
#![no_main]

#[macro_use]
mod fmt;

mod config;
mod hardware;
mod state;
mod tasks;
mod voltage_monitor;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::{
    adc::{Adc, AdcChannel, SampleTime},
    gpio::{Input, Level, Output, Pull, Speed},
    interrupt,
    opamp::{OpAmp, OpAmpGain, OpAmpSpeed},
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
        Channel,
    },
    time::Hertz,
};
use embassy_time::{Duration, Ticker};
use g4_current_core::Motor;

use hardware::{BoardGateDriver, Tim1PowerStage};
use state::{Board, CALIBRATION_REQUEST, MOTOR};
use tasks::{calibration_task, voltage_monitor_task};

/// 電流サンプル完了割り込み（TIM1の更新イベントごと）
#[interrupt]
fn ADC1_2() {
    let adc = hardware::read_phase_adc();
    if let Some(motor) = MOTOR.try_get() {
        motor.on_timer_update(adc);
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_stm32::init(hardware::create_clock_config());

    info!("═══════════════════════════════════════════════════════");
    info!("   G4 current control core • STM32G431VB @ 170MHz");
    info!("═══════════════════════════════════════════════════════");

    // 電流センスアンプ（内蔵PGA、外部出力）
    let mut op1 = OpAmp::new(p.OPAMP1, OpAmpSpeed::HighSpeed);
    let _op1_out = op1.pga_ext(p.PA1, p.PA2, OpAmpGain::Mul16);
    let mut op2 = OpAmp::new(p.OPAMP2, OpAmpSpeed::HighSpeed);
    let _op2_out = op2.pga_ext(p.PA7, p.PA6, OpAmpGain::Mul16);
    let mut op3 = OpAmp::new(p.OPAMP3, OpAmpSpeed::HighSpeed);
    let _op3_out = op3.pga_ext(p.PB0, p.PB1, OpAmpGain::Mul16);

    // PWM初期化（TIM1、3相相補PWM、センターアライン）
    let mut uvw_pwm = ComplementaryPwm::new(
        p.TIM1,
        Some(PwmPin::new(
            p.PE9,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE8,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(PwmPin::new(
            p.PE11,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE10,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(PwmPin::new(
            p.PE13,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        Some(ComplementaryPwmPin::new(
            p.PE12,
            embassy_stm32::gpio::OutputType::PushPull,
        )),
        None,
        None,
        Hertz(config::TIMER_CLOCK_HZ / (2 * config::PWM_PERIOD_CLOCKS as u32)),
        CountingMode::CenterAlignedBothInterrupts,
    );
    uvw_pwm.set_dead_time(config::PWM_DEAD_TIME);
    uvw_pwm.enable(Channel::Ch1);
    uvw_pwm.enable(Channel::Ch2);
    uvw_pwm.enable(Channel::Ch3);
    unsafe {
        hardware::init_pwm_timer();
    }

    // ADC初期化（ADC1: 電流のみ、ADC2: 電流 + バス電圧）
    let _adc1 = Adc::new(p.ADC1);
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(SampleTime::CYCLES640_5);

    // モーター生成
    let gate_driver = BoardGateDriver::new(
        Output::new(p.PB12, Level::Low, Speed::Low),
        Input::new(p.PB11, Pull::Up),
    );
    let motor = Motor::new(
        Tim1PowerStage,
        gate_driver,
        Board,
        config::hardware_config(),
        config::motor_config(),
    );
    if let Err(error) = motor.setup() {
        error!("Motor setup failed: {}", error);
    }
    if MOTOR.init(motor).is_err() {
        error!("Motor initialized twice");
    }

    // 電圧監視タスク起動（PC1 = ADC2_IN7）
    let voltage_pin = p.PC1.degrade_adc();
    spawner
        .spawn(voltage_monitor_task(adc2, voltage_pin))
        .unwrap();

    // 注入変換開始。以降、PWM半周期ごとにモーターの割り込み処理が走る
    unsafe {
        hardware::init_current_sense_adc();
    }

    spawner.spawn(calibration_task()).unwrap();

    let motor = MOTOR.get().await;
    if !motor.is_calibrated() {
        CALIBRATION_REQUEST.signal(());
    }

    // ゲートドライバ監視と電流制限の更新
    let mut ticker = Ticker::every(Duration::from_millis(config::SUPERVISION_PERIOD_MS));
    let mut last_errors = motor.errors();
    loop {
        ticker.next().await;
        motor.do_checks();
        motor.effective_current_lim(&[]);

        let errors = motor.errors();
        if errors != last_errors {
            warn!("Motor errors: {=u32:#x}", errors.bits());
            last_errors = errors;
        }
    }
}
