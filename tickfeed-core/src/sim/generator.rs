//! Synthetic tick source
//!
//! Each instrument follows geometric Brownian motion:
//!
//! ```text
//! dS = mu * S * dt + sigma * S * dW,   dW ~ N(0, 1) * sqrt(dt)
//! ```
//!
//! with zero drift, `dt = 0.001`, a starting price drawn from [100, 5000) and
//! a volatility drawn from [0.01, 0.06). 30% of ticks are trades at the new
//! price (quantity 50); the rest are quotes straddling it with a spread of
//! 5 to 20 bps (quantity 100 each side).

use crate::core::{now_ns, InstrumentId, Tick};
use rand::prelude::*;
use rand_distr::{StandardNormal, Uniform};

const DT: f64 = 0.001;
const TRADE_PROBABILITY: f64 = 0.3;
const TRADE_QUANTITY: u32 = 50;
const QUOTE_QUANTITY: u32 = 100;
const MIN_SPREAD: f64 = 0.0005;
const SPREAD_RANGE: f64 = 0.0015;
const PRICE_FLOOR: f64 = 0.01;

#[derive(Debug, Clone)]
struct InstrumentPath {
    price: f64,
    volatility: f64,
    drift: f64,
    sequence: u32,
}

/// Per-instrument GBM price paths with strictly increasing sequence numbers
pub struct TickGenerator {
    paths: Vec<InstrumentPath>,
    rng: StdRng,
    unit: Uniform<f64>,
}

impl TickGenerator {
    /// `instruments` paths; a seed makes every path reproducible
    pub fn new(instruments: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let price_dist = Uniform::new(100.0, 5000.0);
        let vol_dist = Uniform::new(0.01, 0.06);
        let paths = (0..instruments)
            .map(|_| InstrumentPath {
                price: price_dist.sample(&mut rng),
                volatility: vol_dist.sample(&mut rng),
                drift: 0.0,
                sequence: 0,
            })
            .collect();

        Self {
            paths,
            rng,
            unit: Uniform::new(0.0, 1.0),
        }
    }

    pub fn instruments(&self) -> usize {
        self.paths.len()
    }

    /// Current mid price of an instrument's path
    pub fn price(&self, id: InstrumentId) -> Option<f64> {
        self.paths.get(usize::from(id)).map(|p| p.price)
    }

    /// Advance `id`'s path one step and emit a tick; `None` for unknown ids
    pub fn next_tick(&mut self, id: InstrumentId) -> Option<Tick> {
        let path = self.paths.get_mut(usize::from(id))?;

        let z: f64 = self.rng.sample(StandardNormal);
        let dw = z * DT.sqrt();
        let step = path.drift * path.price * DT + path.volatility * path.price * dw;
        path.price = (path.price + step).max(PRICE_FLOOR);
        path.sequence = path.sequence.wrapping_add(1);

        let ts = now_ns();
        let tick = if self.unit.sample(&mut self.rng) < TRADE_PROBABILITY {
            Tick::trade(ts, id, path.sequence, path.price, TRADE_QUANTITY)
        } else {
            let spread = path.price * (MIN_SPREAD + self.unit.sample(&mut self.rng) * SPREAD_RANGE);
            Tick::quote(
                ts,
                id,
                path.sequence,
                (path.price - spread / 2.0, QUOTE_QUANTITY),
                (path.price + spread / 2.0, QUOTE_QUANTITY),
            )
        };
        Some(tick)
    }

    /// One tick for every instrument, in id order
    pub fn sweep(&mut self) -> Vec<Tick> {
        (0..self.paths.len())
            .filter_map(|id| u16::try_from(id).ok())
            .filter_map(|id| self.next_tick(id))
            .collect()
    }

    /// Flip one random bit of `frame` with probability `rate`; true if flipped
    pub fn maybe_corrupt(&mut self, frame: &mut [u8], rate: f64) -> bool {
        if frame.is_empty() || rate <= 0.0 || self.unit.sample(&mut self.rng) >= rate {
            return false;
        }
        let byte = self.rng.gen_range(0..frame.len());
        let bit = self.rng.gen_range(0..8);
        frame[byte] ^= 1 << bit;
        true
    }
}
