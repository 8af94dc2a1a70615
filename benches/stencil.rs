#![feature(test)]
extern crate test;

use grayscott::field::{LocalField, Species};
use grayscott::settings::Settings;
use grayscott::stepper::ReactionDiffusionStepper;
use grayscott::topology::Direction;

const N: usize = 64;




// ============================================================================
fn seeded_field() -> LocalField {
    let mut field = LocalField::new([N, N, N]);
    let lo = (N / 2 - 6) as i64;
    let hi = (N / 2 + 6) as i64;

    for index in field.interior().clone().iter() {
        let (x, y, z) = index;
        if [x, y, z].iter().all(|c| (lo..hi).contains(c)) {
            field.set(Species::U, index, 0.25);
            field.set(Species::V, index, 0.33);
        }
    }
    field
}




// ============================================================================
#[bench]
fn stencil_step_without_noise(b: &mut test::Bencher) {
    let stepper = ReactionDiffusionStepper::new(&Settings::default(), 0);
    let mut field = seeded_field();
    let mut iteration = 0;

    b.iter(|| {
        stepper.step(&mut field, iteration);
        iteration += 1;
    });
}




// ============================================================================
#[bench]
fn stencil_step_with_noise(b: &mut test::Bencher) {
    let settings = Settings { noise: 1e-7, ..Settings::default() };
    let stepper = ReactionDiffusionStepper::new(&settings, 0);
    let mut field = seeded_field();
    let mut iteration = 0;

    b.iter(|| {
        stepper.step(&mut field, iteration);
        iteration += 1;
    });
}




// ============================================================================
#[bench]
fn pack_and_unpack_every_face(b: &mut test::Bencher) {
    let mut field = seeded_field();

    b.iter(|| {
        for direction in Direction::ALL {
            let buffer = field.pack_face(direction);
            field.unpack_ghost(direction.opposite(), &buffer).unwrap();
        }
    });
}




// ============================================================================
#[bench]
fn copy_interior_without_ghosts(b: &mut test::Bencher) {
    let field = seeded_field();

    b.iter(|| {
        let u = field.u_noghost();
        assert_eq!(u.len(), N * N * N);
    });
}
