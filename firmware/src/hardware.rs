//! ハードウェア初期化とモーターコアのハードウェア境界
//!
//! - TIM1: センターアラインの3相相補PWM。更新イベント（上下の折り返し）で
//!   TRGOを出し、ADCの注入変換を起動する
//! - ADC1/ADC2: 注入変換で3相の電流をサンプル。ADC1の変換完了割り込みで
//!   モーターの割り込み処理を呼ぶ
//! - ゲートドライバ: イネーブル出力とnFAULT入力
//!
//! レジスタを直接触るのはこのモジュールだけです。

use embassy_stm32::{
    gpio::{Input, Output},
    interrupt::{self, InterruptExt, Priority},
    pac, Config,
};
use g4_current_core::hardware::{GateDriver, PowerStage};

use crate::config::{current_sense, AMPLIFIER_GAIN, PWM_PERIOD_CLOCKS};

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

/// TIM1をモーター制御用に設定
///
/// embassyの `ComplementaryPwm` で端子・デッドタイムを設定した後に呼びます。
/// ARRを固定し、PWMモード2（CNT > CCRでハイサイドON）に切り替え、
/// MOE/AOEを落とした状態でTRGOを更新イベントに割り当てます。
///
/// # Safety
/// PACを使用した直接レジスタ操作を含む
pub unsafe fn init_pwm_timer() {
    let tim1 = pac::TIM1;

    tim1.bdtr().modify(|w| {
        w.set_moe(false);
        w.set_aoe(false);
    });

    tim1.arr().write(|w| w.set_arr(PWM_PERIOD_CLOCKS));
    tim1.rcr().write(|w| w.set_rep(0));

    // コンペア値は「ローサイドONの割合」なのでPWMモード2
    tim1.ccmr_output(0).modify(|w| {
        w.set_ocm(0, pac::timer::vals::Ocm::PWM_MODE2);
        w.set_ocm(1, pac::timer::vals::Ocm::PWM_MODE2);
    });
    tim1.ccmr_output(1).modify(|w| {
        w.set_ocm(0, pac::timer::vals::Ocm::PWM_MODE2);
    });

    let half = PWM_PERIOD_CLOCKS / 2;
    for channel in 0..3 {
        tim1.ccr(channel).write(|w| w.set_ccr(half));
    }

    // 更新イベントでADC注入変換を起動
    tim1.cr2().modify(|w| w.set_mms(pac::timer::vals::Mms::UPDATE));
    tim1.egr().write(|w| w.set_ug(true));

    info!(
        "TIM1 configured: ARR={}, centre-aligned, MOE off",
        PWM_PERIOD_CLOCKS
    );
}

// JSQRのビット位置（RM0440）
const JSQR_JL: u32 = 0;
const JSQR_JEXTSEL: u32 = 2;
const JSQR_JEXTEN: u32 = 7;
const JSQR_JSQ1: u32 = 9;
const JSQR_JSQ2: u32 = 15;
/// JEXTSEL = 0: TIM1_TRGO
const JEXTSEL_TIM1_TRGO: u32 = 0;
/// JEXTEN = 0b01: 立ち上がりエッジ（TRGOパルス1回につき変換1回）
const JEXTEN_RISING_EDGE: u32 = 0b01;
const ISR_JEOS: u32 = 1 << 6;
const IER_JEOSIE: u32 = 1 << 6;

fn jsqr(channels: &[u8]) -> u32 {
    let mut bits = ((channels.len() as u32 - 1) << JSQR_JL)
        | (JEXTSEL_TIM1_TRGO << JSQR_JEXTSEL)
        | (JEXTEN_RISING_EDGE << JSQR_JEXTEN);
    for (rank, &channel) in channels.iter().enumerate() {
        let shift = if rank == 0 { JSQR_JSQ1 } else { JSQR_JSQ2 };
        bits |= (channel as u32) << shift;
    }
    bits
}

/// 相電流用の注入変換を設定
///
/// ADC1: A相・C相、ADC2: B相。どちらもTIM1 TRGOで起動します。
/// embassyの `Adc::new` でADCの電源投入・校正・有効化が済んだ後に呼びます。
///
/// # Safety
/// PACを使用した直接レジスタ操作を含む
pub unsafe fn init_current_sense_adc() {
    let adc1 = pac::ADC1;
    let adc2 = pac::ADC2;

    adc1.jsqr().write(|w| {
        w.0 = jsqr(&[
            current_sense::PHASE_A_CHANNEL,
            current_sense::PHASE_C_CHANNEL,
        ])
    });
    adc2.jsqr().write(|w| w.0 = jsqr(&[current_sense::PHASE_B_CHANNEL]));

    // フラグをクリアしてから注入変換を開始
    adc1.isr().write(|w| w.0 = ISR_JEOS);
    adc2.isr().write(|w| w.0 = ISR_JEOS);
    adc1.ier().modify(|w| w.0 |= IER_JEOSIE);
    adc1.cr().modify(|w| w.set_jadstart(true));
    adc2.cr().modify(|w| w.set_jadstart(true));

    // 電流制御は最優先
    interrupt::ADC1_2.set_priority(Priority::P0);
    interrupt::ADC1_2.enable();

    info!("Current sense ADC configured (injected, TIM1 TRGO)");
}

/// 注入変換の結果を読み出し、完了フラグをクリア
///
/// ADC2の変換が終わっていなければB相は `None` です。
pub fn read_phase_adc() -> [Option<u32>; 3] {
    let adc1 = pac::ADC1;
    let adc2 = pac::ADC2;

    let a = adc1.jdr(0).read().0 & 0xFFFF;
    let c = adc1.jdr(1).read().0 & 0xFFFF;
    adc1.isr().write(|w| w.0 = ISR_JEOS);

    let b = if adc2.isr().read().0 & ISR_JEOS != 0 {
        adc2.isr().write(|w| w.0 = ISR_JEOS);
        Some(adc2.jdr(0).read().0 & 0xFFFF)
    } else {
        None
    };

    [Some(a), b, Some(c)]
}

/// TIM1をモーターコアから操作するためのハンドル
pub struct Tim1PowerStage;

impl PowerStage for Tim1PowerStage {
    fn set_compare(&mut self, values: [u16; 3]) {
        let tim1 = pac::TIM1;
        for (channel, value) in values.into_iter().enumerate() {
            tim1.ccr(channel).write(|w| w.set_ccr(value));
        }
    }

    fn set_auto_output_enable(&mut self, enable: bool) {
        pac::TIM1.bdtr().modify(|w| w.set_aoe(enable));
    }

    fn disable_output(&mut self) {
        pac::TIM1.bdtr().modify(|w| w.set_moe(false));
    }

    fn is_output_enabled(&self) -> bool {
        pac::TIM1.bdtr().read().moe()
    }

    fn update_event_occurred(&self) -> bool {
        pac::TIM1.sr().read().uif()
    }

    fn clear_update_event(&mut self) {
        pac::TIM1.sr().modify(|w| w.set_uif(false));
    }

    fn is_counting_down(&self) -> bool {
        pac::TIM1.cr1().read().dir() == pac::timer::vals::Dir::DOWN
    }
}

/// ゲートドライバ（イネーブル + nFAULT）と内蔵PGA
///
/// PGAのゲインは配線で固定なので、`configure` は要求値に関係なく
/// ボードのゲインを返します。
pub struct BoardGateDriver {
    enable: Output<'static>,
    n_fault: Input<'static>,
    ready: bool,
}

impl BoardGateDriver {
    pub fn new(enable: Output<'static>, n_fault: Input<'static>) -> Self {
        Self {
            enable,
            n_fault,
            ready: false,
        }
    }
}

impl GateDriver for BoardGateDriver {
    fn configure(&mut self, requested_gain: f32) -> Option<f32> {
        if AMPLIFIER_GAIN > requested_gain {
            warn!(
                "Amplifier gain {} above requested {}, current range reduced",
                AMPLIFIER_GAIN, requested_gain
            );
        }
        Some(AMPLIFIER_GAIN)
    }

    fn init(&mut self) -> bool {
        self.enable.set_low();
        self.ready = self.n_fault.is_high();
        self.ready
    }

    fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.enable.set_high();
        } else {
            self.enable.set_low();
        }
    }

    fn do_checks(&mut self) {
        // nFAULTはアクティブロー
        self.ready = self.n_fault.is_high();
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}
