#![cfg(target_arch = "wasm32")]

use ecosystem_engine::{ecosystem_health, EcosystemGame};
use wasm_bindgen_test::*;

#[wasm_bindgen_test]
fn test_seats_share_one_round() {
    let mut game = EcosystemGame::new(7);
    let a = game.add_seat(0.0);
    let b = game.add_seat(0.0);
    game.join(a, 0.0).unwrap();
    game.join(b, 10.0).unwrap();
    game.tick(20.0);

    game.choose(a, "A", 1_000.0).unwrap();
    assert!(game.choose(a, "A", 1_100.0).is_err());
    assert!(game.choose(b, "C", 1_200.0).is_err());
    assert!(!game.view(a, 1_000.0).is_null());
    assert!(game.view(9, 1_000.0).is_null());
}

#[wasm_bindgen_test]
fn test_health_binding() {
    assert!((ecosystem_health(10, 5, 10, 8, 6) - 56.15).abs() < 1e-9);
}
