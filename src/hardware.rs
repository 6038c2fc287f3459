//! ハードウェア境界
//!
//! モーターコアが触れるハードウェアはこのトレイトだけです。
//! レジスタ操作の実装はファームウェア側に置きます。

/// 3相PWMタイマー（シャドウレジスタ付き）
///
/// コンペア値とAOEは次の更新イベントでラッチされます。
pub trait PowerStage {
    /// 3相のコンペア値をシャドウレジスタへ書き込む
    fn set_compare(&mut self, values: [u16; 3]);

    /// 自動出力許可（AOE）。セットされていると次の更新イベントでMOEが立つ
    fn set_auto_output_enable(&mut self, enable: bool);

    /// マスター出力（MOE）を無条件に落とす
    fn disable_output(&mut self);

    /// マスター出力が有効か
    fn is_output_enabled(&self) -> bool;

    /// 更新イベントフラグが立っているか
    fn update_event_occurred(&self) -> bool;

    /// 更新イベントフラグをクリア
    fn clear_update_event(&mut self);

    /// カウンタがダウンカウント中か（センターアラインモード）
    fn is_counting_down(&self) -> bool;
}

/// ゲートドライバ（電流センスアンプ込み）
pub trait GateDriver {
    /// アンプゲインを要求し、実際に設定されたゲインを返す
    fn configure(&mut self, requested_gain: f32) -> Option<f32>;

    fn init(&mut self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    /// フォルト状態をポーリング
    fn do_checks(&mut self);

    fn is_ready(&self) -> bool;
}
