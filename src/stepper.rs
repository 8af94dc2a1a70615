use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::field::{Current, LocalField};
use crate::settings::Settings;

/// Seed used when the settings do not name one.
pub const DEFAULT_SEED: u64 = 0x6772_6179_7363_6f74;

/// Advances U and V by one explicit Euler step of the Gray-Scott system:
///
/// ```text
/// U' = U + dt * (Du lap(U) - U V^2 + F (1 - U) + noise r)
/// V' = V + dt * (Dv lap(V) + U V^2 - (F + k) V + noise r)
/// ```
///
/// where `lap` is the 7-point Laplacian with unit spacing and `r` is a fresh
/// uniform sample from [-1, 1) per cell and species. The new values go to the
/// next generation of the field, which is then made current.
///
/// The sweep is parallel over x-planes. Every plane draws its noise from its
/// own ChaCha stream, keyed on the seed, the rank, the iteration and the
/// plane, so results do not depend on how rayon schedules the planes.
#[derive(Clone, Debug)]
pub struct ReactionDiffusionStepper {
    f: f64,
    k: f64,
    dt: f64,
    du: f64,
    dv: f64,
    noise: f64,
    seed: u64,
    rank: usize,
}

impl ReactionDiffusionStepper {
    pub fn new(settings: &Settings, rank: usize) -> Self {
        Self {
            f: settings.f,
            k: settings.k,
            dt: settings.dt,
            du: settings.du,
            dv: settings.dv,
            noise: settings.noise,
            seed: settings.seed.unwrap_or(DEFAULT_SEED),
            rank,
        }
    }

    /// Compute the next generation from the current one, then swap them.
    /// The ghost cells of the current generation must be up to date. The
    /// ghost cells of the result are stale until the next halo exchange.
    pub fn step(&self, field: &mut LocalField, iteration: u64) {
        let [sx, sy, sz] = field.size();
        let strides = Strides {
            plane: (sy + 2) * (sz + 2),
            row: sz + 2,
        };
        let (current, next) = field.generations();
        let current = &current;

        next.u
            .par_chunks_mut(strides.plane)
            .zip(next.v.par_chunks_mut(strides.plane))
            .enumerate()
            .filter(|(i, _)| (1..=sx).contains(i))
            .for_each(|(i, (u2, v2))| {
                self.sweep_plane(current, strides, [i, sy, sz], u2, v2, iteration)
            });

        field.swap();
    }

    fn sweep_plane(
        &self,
        current: &Current<'_>,
        strides: Strides,
        [i, sy, sz]: [usize; 3],
        u2: &mut [f64],
        v2: &mut [f64],
        iteration: u64,
    ) {
        let mut noise = self.noise_source(iteration, i);

        for j in 1..=sy {
            for k in 1..=sz {
                let m = j * strides.row + k;
                let n = i * strides.plane + m;
                let u = current.u[n];
                let v = current.v[n];
                let uvv = u * v * v;

                let mut du = self.du * laplacian(current.u, n, strides) - uvv + self.f * (1.0 - u);
                let mut dv = self.dv * laplacian(current.v, n, strides) + uvv - (self.f + self.k) * v;

                if let Some(rng) = noise.as_mut() {
                    du += self.noise * rng.random_range(-1.0..1.0_f64);
                    dv += self.noise * rng.random_range(-1.0..1.0_f64);
                }
                u2[m] = u + self.dt * du;
                v2[m] = v + self.dt * dv;
            }
        }
    }

    fn noise_source(&self, iteration: u64, plane: usize) -> Option<ChaCha8Rng> {
        if self.noise > 0.0 {
            let key = [self.rank as u64, iteration, plane as u64]
                .iter()
                .fold(self.seed, |acc, &x| mix(acc ^ x));
            Some(ChaCha8Rng::seed_from_u64(key))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy)]
struct Strides {
    plane: usize,
    row: usize,
}

fn laplacian(s: &[f64], n: usize, strides: Strides) -> f64 {
    let Strides { plane, row } = strides;
    s[n - plane] + s[n + plane] + s[n - row] + s[n + row] + s[n - 1] + s[n + 1] - 6.0 * s[n]
}

/// SplitMix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::field::Species;

    fn settings() -> Settings {
        Settings { l: 6, ..Settings::default() }
    }

    #[test]
    fn uniform_steady_state_is_preserved() {
        let stepper = ReactionDiffusionStepper::new(&settings(), 0);
        let mut field = LocalField::new([3, 4, 5]);

        for iteration in 0..5 {
            stepper.step(&mut field, iteration);
            // U = 1, V = 0 has no reaction and no gradient. The new
            // generation's ghosts are stale, so close the box by hand.
            for index in field.interior().clone().iter() {
                assert_eq!(field.get(Species::U, index), 1.0);
                assert_eq!(field.get(Species::V, index), 0.0);
            }
            for direction in crate::topology::Direction::ALL {
                field.mirror_face(direction);
            }
        }
    }

    #[test]
    fn single_cell_update_matches_the_formula() {
        let s = Settings { f: 0.03, k: 0.06, dt: 0.5, du: 0.1, dv: 0.05, ..settings() };
        let stepper = ReactionDiffusionStepper::new(&s, 0);
        let mut field = LocalField::new([1, 1, 1]);

        // One interior cell with six ghost neighbors.
        field.set(Species::U, (0, 0, 0), 0.5);
        field.set(Species::V, (0, 0, 0), 0.25);
        field.set(Species::U, (-1, 0, 0), 0.7);
        field.set(Species::V, (0, 0, 1), 0.1);

        stepper.step(&mut field, 0);

        let (u, v) = (0.5, 0.25);
        let lap_u = 0.7 + 5.0 * 1.0 - 6.0 * u;
        let lap_v = 0.1 + 5.0 * 0.0 - 6.0 * v;
        let expected_u = u + 0.5 * (0.1 * lap_u - u * v * v + 0.03 * (1.0 - u));
        let expected_v = v + 0.5 * (0.05 * lap_v + u * v * v - (0.03 + 0.06) * v);

        assert!((field.get(Species::U, (0, 0, 0)) - expected_u).abs() < 1e-12);
        assert!((field.get(Species::V, (0, 0, 0)) - expected_v).abs() < 1e-12);
    }

    #[test]
    fn noise_is_reproducible_and_bounded() {
        let s = Settings { noise: 0.01, f: 0.0, k: 0.0, seed: Some(7), ..settings() };
        let stepper = ReactionDiffusionStepper::new(&s, 3);

        let run = || {
            let mut field = LocalField::new([4, 4, 4]);
            stepper.step(&mut field, 11);
            field.u_noghost()
        };
        let a = run();
        let b = run();

        assert_eq!(a, b);
        assert!(a.iter().any(|&u| u != 1.0));
        assert!(a.iter().all(|&u| (u - 1.0).abs() <= s.dt * s.noise + 1e-12));
    }

    #[test]
    fn noise_streams_differ_between_ranks() {
        let s = Settings { noise: 0.01, ..settings() };
        let run = |rank| {
            let mut field = LocalField::new([2, 2, 2]);
            ReactionDiffusionStepper::new(&s, rank).step(&mut field, 0);
            field.v_noghost()
        };
        assert_ne!(run(0), run(1));
    }
}
