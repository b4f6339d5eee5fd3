use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

const REQUEST_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const REQUEST_ID_LEN: usize = 24;

/// Shared random source for host selection and request ids.
///
/// Seed it to make both reproducible.
#[derive(Debug)]
pub struct RandomSource {
    rng: Mutex<StdRng>,
}

impl RandomSource {
    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Uniformly picks one item, `None` for an empty slice.
    pub fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        match items.len() {
            0 => None,
            1 => items.first(),
            len => items.get(self.rng.lock().random_range(0..len)),
        }
    }

    /// 24 characters drawn from `[A-Z0-9]`.
    pub fn request_id(&self) -> String {
        let mut rng = self.rng.lock();
        (0..REQUEST_ID_LEN)
            .map(|_| {
                let idx = rng.random_range(0..REQUEST_ID_ALPHABET.len());
                REQUEST_ID_ALPHABET[idx] as char
            })
            .collect()
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_have_the_expected_shape() {
        let random = RandomSource::from_entropy();
        for _ in 0..64 {
            let id = random.request_id();
            assert_eq!(id.len(), REQUEST_ID_LEN);
            assert!(
                id.bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
            );
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = RandomSource::seeded(7);
        let b = RandomSource::seeded(7);
        let hosts = ["h1", "h2", "h3", "h4"];
        for _ in 0..16 {
            assert_eq!(a.pick(&hosts), b.pick(&hosts));
        }
        assert_eq!(a.request_id(), b.request_id());
    }

    #[test]
    fn pick_handles_small_slices() {
        let random = RandomSource::seeded(1);
        let empty: [&str; 0] = [];
        assert_eq!(random.pick(&empty), None);
        assert_eq!(random.pick(&["only"]), Some(&"only"));
    }
}
