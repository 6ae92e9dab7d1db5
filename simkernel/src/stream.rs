//! Named random number streams.
//!
//! Each stream is a ChaCha generator. Unless seeded explicitly, a stream is derived from the
//! replication seed and the stream name, so adding or removing a stream never changes the
//! values drawn from the others.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// A shared handle to a named random stream.
///
/// Cloning the handle does not fork the stream: all clones draw from the same generator.
#[derive(Clone)]
pub struct Stream {
    name: Arc<str>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl Stream {
    fn new(name: &str, rng: ChaCha8Rng) -> Self {
        Self {
            name: Arc::from(name),
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Name of the stream.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `f` with exclusive access to the generator.
    pub fn with<R, F: FnOnce(&mut ChaCha8Rng) -> R>(&self, f: F) -> R {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }

    fn replace(&self, rng: ChaCha8Rng) {
        self.with(|current| *current = rng);
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("name", &self.name).finish()
    }
}

impl RngCore for Stream {
    fn next_u32(&mut self) -> u32 {
        self.with(RngCore::next_u32)
    }

    fn next_u64(&mut self) -> u64 {
        self.with(RngCore::next_u64)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.with(|rng| rng.fill_bytes(dest));
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.with(|rng| rng.try_fill_bytes(dest))
    }
}

/// Named random streams of one replication.
#[derive(Debug, Clone)]
pub struct RandomStreams {
    seed: u64,
    streams: BTreeMap<String, Stream>,
}

impl Default for RandomStreams {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RandomStreams {
    /// Creates a stream set whose streams are derived from `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            streams: BTreeMap::new(),
        }
    }

    /// The seed all non-overridden streams are derived from.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the stream called `name`, creating it if it does not exist yet.
    pub fn stream(&mut self, name: &str) -> Stream {
        let seed = self.seed;
        self.streams
            .entry(name.to_string())
            .or_insert_with(|| Stream::new(name, derive(seed, name)))
            .clone()
    }

    /// Seeds the stream called `name` independently of the replication seed.
    /// Existing handles to this stream observe the new state.
    pub fn reseed(&mut self, name: &str, seed: u64) {
        let rng = ChaCha8Rng::seed_from_u64(seed);
        match self.streams.get(name) {
            Some(stream) => stream.replace(rng),
            None => {
                self.streams
                    .insert(name.to_string(), Stream::new(name, rng));
            }
        }
    }

    /// Iterates over the names of created streams, in alphabetical order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.streams.keys().map(String::as_str)
    }
}

fn derive(seed: u64, name: &str) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(fnv1a(name));
    rng
}

/// 64-bit FNV-1a hash; stable across platforms and releases, unlike `DefaultHasher`.
fn fnv1a(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Mixes a base seed with a replication index (SplitMix64 finalizer).
pub(crate) fn mix(base: u64, index: u64) -> u64 {
    let mut z = base.wrapping_add(index.wrapping_add(1).wrapping_mul(0x9e37_79b9_7f4a_7c15));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
