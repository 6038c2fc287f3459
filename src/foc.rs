// αβ-frame math shared by the current-sense path and the PWM output path

pub mod svpwm;
pub mod transforms;

// Re-export main functions for easier access
pub use svpwm::space_vector_modulation;
pub use transforms::{clarke, inverse_clarke, ONE_BY_SQRT3};
