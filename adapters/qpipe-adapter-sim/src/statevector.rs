//! Statevector engine for the pulse simulators.

use num_complex::Complex64;
use rand::Rng;

/// A statevector over a handful of qubits. Qubit `q` is bit `q` of the
/// basis index.
#[derive(Debug, Clone)]
pub struct Statevector {
    /// The state amplitudes (2^n complex numbers).
    amplitudes: Vec<Complex64>,
    /// Number of qubits.
    num_qubits: usize,
}

impl Statevector {
    /// Create a new statevector initialized to |0...0⟩.
    pub fn new(num_qubits: usize) -> Self {
        let size = 1 << num_qubits;
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); size];
        amplitudes[0] = Complex64::new(1.0, 0.0);
        Self {
            amplitudes,
            num_qubits,
        }
    }

    fn apply_rx(&mut self, qubit: usize, theta: f64) {
        let mask = 1 << qubit;
        let c = Complex64::new((theta / 2.0).cos(), 0.0);
        let s = Complex64::new(0.0, -(theta / 2.0).sin());
        for i in 0..(1 << self.num_qubits) {
            if i & mask == 0 {
                let j = i | mask;
                let a = self.amplitudes[i];
                let b = self.amplitudes[j];
                self.amplitudes[i] = c * a + s * b;
                self.amplitudes[j] = s * a + c * b;
            }
        }
    }

    fn apply_rz(&mut self, qubit: usize, theta: f64) {
        let mask = 1 << qubit;
        let phase_0 = Complex64::from_polar(1.0, -theta / 2.0);
        let phase_1 = Complex64::from_polar(1.0, theta / 2.0);
        for i in 0..(1 << self.num_qubits) {
            if i & mask == 0 {
                self.amplitudes[i] *= phase_0;
            } else {
                self.amplitudes[i] *= phase_1;
            }
        }
    }

    /// Rotation by `theta` about the equatorial axis at angle `phi` from X,
    /// which is what a resonant drive with carrier phase `phi` does.
    pub fn apply_prx(&mut self, qubit: usize, theta: f64, phi: f64) {
        // PRX(θ, φ) = RZ(φ) · RX(θ) · RZ(-φ)
        self.apply_rz(qubit, -phi);
        self.apply_rx(qubit, theta);
        self.apply_rz(qubit, phi);
    }

    /// Cross-resonance interaction `exp(-i θ/2 Z⊗X)`: the target rotates
    /// about X by `+θ` or `-θ` depending on the control.
    pub fn apply_zx(&mut self, control: usize, target: usize, theta: f64) {
        let ctrl_mask = 1 << control;
        let tgt_mask = 1 << target;
        let cos = (theta / 2.0).cos();
        let sin = (theta / 2.0).sin();
        for i in 0..(1 << self.num_qubits) {
            if i & tgt_mask != 0 {
                continue;
            }
            let j = i | tgt_mask;
            let sign = if i & ctrl_mask == 0 { 1.0 } else { -1.0 };
            let c = Complex64::new(cos, 0.0);
            let s = Complex64::new(0.0, -sign * sin);
            let a = self.amplitudes[i];
            let b = self.amplitudes[j];
            self.amplitudes[i] = c * a + s * b;
            self.amplitudes[j] = s * a + c * b;
        }
    }

    /// Probability of reading `1` on a qubit.
    pub fn probability_one(&self, qubit: usize) -> f64 {
        let mask = 1 << qubit;
        self.amplitudes
            .iter()
            .enumerate()
            .filter(|(i, _)| i & mask != 0)
            .map(|(_, amp)| amp.norm_sqr())
            .sum()
    }

    /// Projectively measure one qubit, collapsing the state.
    pub fn measure<R: Rng>(&mut self, qubit: usize, rng: &mut R) -> bool {
        let p1 = self.probability_one(qubit).clamp(0.0, 1.0);
        let r: f64 = rng.r#gen();
        let outcome = r < p1;

        let mask = 1 << qubit;
        let norm = if outcome { p1 } else { 1.0 - p1 }.sqrt();
        for (i, amp) in self.amplitudes.iter_mut().enumerate() {
            let keep = (i & mask != 0) == outcome;
            if !keep {
                *amp = Complex64::new(0.0, 0.0);
            } else if norm > 0.0 {
                *amp /= norm;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::PI;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn test_initial_state() {
        let sv = Statevector::new(2);
        assert!(approx(sv.probability_one(0), 0.0));
        assert!(approx(sv.probability_one(1), 0.0));
    }

    #[test]
    fn test_pi_rotation_flips() {
        let mut sv = Statevector::new(1);
        sv.apply_prx(0, PI, 0.0);
        assert!(approx(sv.probability_one(0), 1.0));
    }

    #[test]
    fn test_half_pi_rotation_is_balanced() {
        for phi in [0.0, PI / 2.0, 1.234] {
            let mut sv = Statevector::new(1);
            sv.apply_prx(0, PI / 2.0, phi);
            assert!(approx(sv.probability_one(0), 0.5));
        }
    }

    #[test]
    fn test_phase_sets_rotation_axis() {
        // Two π/2 pulses with opposite phase cancel out
        let mut sv = Statevector::new(1);
        sv.apply_prx(0, PI / 2.0, 0.0);
        sv.apply_prx(0, PI / 2.0, PI);
        assert!(approx(sv.probability_one(0), 0.0));
    }

    #[test]
    fn test_zx_flips_target_for_either_control() {
        let mut sv = Statevector::new(2);
        sv.apply_zx(0, 1, PI);
        assert!(approx(sv.probability_one(1), 1.0));

        let mut sv = Statevector::new(2);
        sv.apply_prx(0, PI, 0.0);
        sv.apply_zx(0, 1, PI);
        assert!(approx(sv.probability_one(0), 1.0));
        assert!(approx(sv.probability_one(1), 1.0));
    }

    #[test]
    fn test_zx_half_rotation() {
        let mut sv = Statevector::new(2);
        sv.apply_prx(0, PI / 2.0, PI / 2.0);
        sv.apply_zx(0, 1, PI / 2.0);
        assert!(approx(sv.probability_one(0), 0.5));
        assert!(approx(sv.probability_one(1), 0.5));
    }

    #[test]
    fn test_measure_collapses() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut sv = Statevector::new(1);
        sv.apply_prx(0, PI / 2.0, 0.0);

        let outcome = sv.measure(0, &mut rng);
        let expected = if outcome { 1.0 } else { 0.0 };
        assert!(approx(sv.probability_one(0), expected));
        // Measuring again gives the same answer
        assert_eq!(sv.measure(0, &mut rng), outcome);
    }
}
