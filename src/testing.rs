//! Host-side simulation bench
//!
//! A centre-aligned PWM timer with shadow registers, a gate driver with a
//! discrete amplifier gain table, a supervisor with settable bus state and an
//! R-L load. Each half-cycle the load integrates the voltage of the active
//! compare values, the timer latches its shadow registers and flips
//! direction, the ADC samples and the update interrupt runs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::config::{MotorConfig, MotorHardwareConfig, DC_CALIB_SETTLE_TAUS};
use crate::error::MotorError;
use crate::hardware::{GateDriver, PowerStage};
use crate::motor::{Motor, StepDelay};
use crate::supervisor::MotorSupervisor;

const AMPLIFIER_GAINS: [f32; 4] = [10.0, 20.0, 40.0, 80.0];
const SQRT3: f32 = 1.732_050_8;

#[derive(Debug, Default)]
pub struct SimTimer {
    pub shadow: [u16; 3],
    pub active: [u16; 3],
    pub aoe: bool,
    pub moe: bool,
    pub update_flag: bool,
    pub counting_down: bool,
    /// Raise the update flag on every compare write
    pub latch_during_write: bool,
}

impl SimTimer {
    /// Update event at a counter turnaround
    fn latch(&mut self) {
        self.active = self.shadow;
        if self.aoe {
            self.moe = true;
        }
        self.update_flag = true;
        self.counting_down = !self.counting_down;
    }
}

pub struct SimPowerStage(Rc<RefCell<SimTimer>>);

impl PowerStage for SimPowerStage {
    fn set_compare(&mut self, values: [u16; 3]) {
        let mut timer = self.0.borrow_mut();
        timer.shadow = values;
        if timer.latch_during_write {
            timer.update_flag = true;
        }
    }

    fn set_auto_output_enable(&mut self, enable: bool) {
        self.0.borrow_mut().aoe = enable;
    }

    fn disable_output(&mut self) {
        self.0.borrow_mut().moe = false;
    }

    fn is_output_enabled(&self) -> bool {
        self.0.borrow().moe
    }

    fn update_event_occurred(&self) -> bool {
        self.0.borrow().update_flag
    }

    fn clear_update_event(&mut self) {
        self.0.borrow_mut().update_flag = false;
    }

    fn is_counting_down(&self) -> bool {
        self.0.borrow().counting_down
    }
}

#[derive(Debug)]
pub struct SimGateDriverState {
    pub requested_gain: Option<f32>,
    pub configure_ok: bool,
    pub ready: bool,
    pub enabled: bool,
    pub disable_count: u32,
}

impl Default for SimGateDriverState {
    fn default() -> Self {
        Self {
            requested_gain: None,
            configure_ok: true,
            ready: true,
            enabled: false,
            disable_count: 0,
        }
    }
}

pub struct SimGateDriver(Rc<RefCell<SimGateDriverState>>);

impl GateDriver for SimGateDriver {
    fn configure(&mut self, requested_gain: f32) -> Option<f32> {
        let mut state = self.0.borrow_mut();
        state.requested_gain = Some(requested_gain);
        if !state.configure_ok {
            return None;
        }
        // Largest gain not above the request
        let gain = AMPLIFIER_GAINS
            .iter()
            .copied()
            .filter(|&gain| gain <= requested_gain)
            .last()
            .unwrap_or(AMPLIFIER_GAINS[0]);
        Some(gain)
    }

    fn init(&mut self) -> bool {
        true
    }

    fn set_enabled(&mut self, enabled: bool) {
        let mut state = self.0.borrow_mut();
        if !enabled {
            state.disable_count += 1;
        }
        state.enabled = enabled;
    }

    fn do_checks(&mut self) {}

    fn is_ready(&self) -> bool {
        self.0.borrow().ready
    }
}

pub struct SimSupervisor {
    vbus: Cell<f32>,
    brake_armed: Cell<bool>,
    fast_check: Cell<Result<(), MotorError>>,
    controller_resets: Cell<u32>,
    brake_updates: Cell<u32>,
    last_brake_current: Cell<f32>,
}

impl Default for SimSupervisor {
    fn default() -> Self {
        Self {
            vbus: Cell::new(24.0),
            brake_armed: Cell::new(true),
            fast_check: Cell::new(Ok(())),
            controller_resets: Cell::new(0),
            brake_updates: Cell::new(0),
            last_brake_current: Cell::new(0.0),
        }
    }
}

impl SimSupervisor {
    pub fn set_brake_armed(&self, armed: bool) {
        self.brake_armed.set(armed);
    }

    pub fn set_fast_check(&self, result: Result<(), MotorError>) {
        self.fast_check.set(result);
    }

    pub fn controller_resets(&self) -> u32 {
        self.controller_resets.get()
    }

    pub fn brake_updates(&self) -> u32 {
        self.brake_updates.get()
    }

    pub fn last_brake_current(&self) -> f32 {
        self.last_brake_current.get()
    }
}

impl MotorSupervisor for SimSupervisor {
    fn vbus_voltage(&self) -> f32 {
        self.vbus.get()
    }

    fn brake_resistor_armed(&self) -> bool {
        self.brake_armed.get()
    }

    fn update_brake_current(&self, i_bus: f32) {
        self.brake_updates.set(self.brake_updates.get() + 1);
        self.last_brake_current.set(i_bus);
    }

    fn do_fast_checks(&self) -> Result<(), MotorError> {
        self.fast_check.get()
    }

    fn reset_controllers(&self) {
        self.controller_resets.set(self.controller_resets.get() + 1);
    }
}

/// Star-connected R-L load, no back-EMF
#[derive(Debug, Clone)]
pub struct Plant {
    pub resistance: f32,
    pub inductance: f32,
    pub i_alpha: f32,
    pub i_beta: f32,
    /// Sampled phase currents override the load on live samples [A]
    pub force_current: Option<[f32; 3]>,
    /// Raw ADC codes override every sample
    pub force_code: Option<[u32; 3]>,
}

impl Default for Plant {
    fn default() -> Self {
        Self {
            resistance: 0.05,
            inductance: 50e-6,
            i_alpha: 0.0,
            i_beta: 0.0,
            force_current: None,
            force_code: None,
        }
    }
}

impl Plant {
    /// Exact response to a constant αβ voltage over `dt`
    fn step(&mut self, v_alpha: f32, v_beta: f32, dt: f32) {
        let resistance = self.resistance;
        let decay = (-resistance * dt / self.inductance).exp();
        let settle = |i: f32, v: f32| {
            let i_final = v / resistance;
            i_final + (i - i_final) * decay
        };
        self.i_alpha = settle(self.i_alpha, v_alpha);
        self.i_beta = settle(self.i_beta, v_beta);
    }

    fn phase_currents(&self) -> [f32; 3] {
        let b = -0.5 * self.i_alpha + 0.5 * SQRT3 * self.i_beta;
        let c = -0.5 * self.i_alpha - 0.5 * SQRT3 * self.i_beta;
        [self.i_alpha, b, c]
    }
}

pub struct Bench {
    pub motor: Motor<SimPowerStage, SimGateDriver, SimSupervisor>,
    timer: Rc<RefCell<SimTimer>>,
    gate_driver: Rc<RefCell<SimGateDriverState>>,
    plant: RefCell<Plant>,
    hw: MotorHardwareConfig,
}

impl Bench {
    /// Motor on the default board, amplifier already configured
    pub fn new(plant: Plant, config: MotorConfig) -> Self {
        let hw = MotorHardwareConfig::default();
        let timer = Rc::new(RefCell::new(SimTimer::default()));
        let gate_driver = Rc::new(RefCell::new(SimGateDriverState::default()));
        let motor = Motor::new(
            SimPowerStage(timer.clone()),
            SimGateDriver(gate_driver.clone()),
            SimSupervisor::default(),
            hw,
            config,
        );
        motor.setup().expect("gate driver setup");
        Self {
            motor,
            timer,
            gate_driver,
            plant: RefCell::new(plant),
            hw,
        }
    }

    pub fn timer(&self) -> Rc<RefCell<SimTimer>> {
        self.timer.clone()
    }

    pub fn gate_driver(&self) -> Rc<RefCell<SimGateDriverState>> {
        self.gate_driver.clone()
    }

    pub fn plant(&self) -> &RefCell<Plant> {
        &self.plant
    }

    pub fn supervisor(&self) -> &SimSupervisor {
        self.motor.supervisor()
    }

    /// Run until the DC offset estimate is trusted, then one more full period
    pub fn warm_up(&self) {
        let settle_time = self.motor.config().dc_calib_tau * DC_CALIB_SETTLE_TAUS;
        let max_half_cycles = (2.0 * settle_time / self.hw.timer.interrupt_period()) as u32 + 100;
        let mut half_cycles = 0;
        while self.motor.dc_calibration().running_since < settle_time {
            assert!(half_cycles < max_half_cycles, "DC calibration never settled");
            self.run_half_cycles(2);
            half_cycles += 2;
        }
        self.run_half_cycles(2);
    }

    pub fn run_half_cycles(&self, count: u32) {
        for _ in 0..count {
            self.half_cycle();
        }
    }

    pub fn delay(&self) -> SimDelay<'_> {
        SimDelay {
            bench: self,
            elapsed_ms: 0,
        }
    }

    fn half_cycle(&self) {
        let timing = self.hw.timer;
        let dt = timing.interrupt_period();
        let vbus = self.supervisor().vbus_voltage();

        let counting_down = {
            let mut timer = self.timer.borrow_mut();
            let (v_alpha, v_beta) = if timer.moe {
                let period = timing.period_clocks as f32;
                let [va, vb, vc] = timer.active.map(|t| (1.0 - t as f32 / period) * vbus);
                ((2.0 / 3.0) * (va - 0.5 * (vb + vc)), (vb - vc) / SQRT3)
            } else {
                (0.0, 0.0)
            };
            self.plant.borrow_mut().step(v_alpha, v_beta, dt);
            timer.latch();
            timer.counting_down
        };

        let adc = self.sample(counting_down);
        self.motor.on_timer_update(adc);
    }

    /// ADC codes for the vector sampled in this half-cycle
    fn sample(&self, counting_down: bool) -> [Option<u32>; 3] {
        let plant = self.plant.borrow();
        let mid = (self.hw.adc.full_scale() / 2) as f32;
        let codes = if let Some(codes) = plant.force_code {
            codes
        } else if counting_down {
            // All high sides on: no current through the shunts
            [mid as u32; 3]
        } else {
            let amps_per_code = self.amps_per_code();
            plant
                .force_current
                .unwrap_or_else(|| plant.phase_currents())
                .map(|i| (mid + i / amps_per_code).round().max(0.0) as u32)
        };

        let mut adc = codes.map(Some);
        for (phase, code) in adc.iter_mut().enumerate() {
            if self.hw.current_sensor_mask & (1 << phase) == 0 {
                *code = None;
            }
        }
        adc
    }

    fn amps_per_code(&self) -> f32 {
        self.hw.adc.volts_per_code()
            * self.motor.phase_current_rev_gain()
            * self.hw.shunt_conductance
    }
}

/// Calibration delay advancing the simulation in real time
pub struct SimDelay<'a> {
    bench: &'a Bench,
    pub elapsed_ms: u32,
}

impl StepDelay for SimDelay<'_> {
    async fn delay_ms(&mut self, ms: u32) {
        let per_ms = (1e-3 / self.bench.hw.timer.interrupt_period()).round() as u32;
        self.bench.run_half_cycles(per_ms * ms);
        self.elapsed_ms += ms;
    }
}
