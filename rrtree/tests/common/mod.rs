#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::Rng;
use rrtree::{Item, Rect};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Unit squares on a grid with gaps, so no two items overlap
pub fn grid_item(id: u64) -> Item {
    let x = (id % 17) as f64 * 3.0;
    let y = (id / 17) as f64 * 3.0;
    Item::new(id, Rect::new(x, y, x + 1.0, y + 1.0))
}

pub fn random_item(rng: &mut StdRng, id: u64) -> Item {
    let x: f64 = rng.gen_range(0.0..1000.0);
    let y: f64 = rng.gen_range(0.0..1000.0);
    let w: f64 = rng.gen_range(0.0..5.0);
    let h: f64 = rng.gen_range(0.0..5.0);
    Item::new(id, Rect::new(x, y, x + w, y + h))
}
