//! Push ids: 20-character keys that sort in creation order.
//!
//! The first 8 characters encode the creation time in milliseconds, the
//! remaining 12 are random. Two ids minted in the same millisecond reuse the
//! random suffix incremented by one, so ordering holds within a millisecond.

use rand::Rng;

/// 64 characters in ASCII order, so string comparison matches numeric order.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

const TIME_LEN: usize = 8;
const RANDOM_LEN: usize = 12;

#[derive(Debug, Default)]
pub struct PushIdGenerator {
    last_time: i64,
    last_random: [u8; RANDOM_LEN],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an id for `now` (epoch milliseconds).
    pub fn next_id(&mut self, now: i64) -> String {
        if now == self.last_time {
            self.increment_random();
        } else {
            let mut rng = rand::thread_rng();
            for digit in &mut self.last_random {
                *digit = rng.gen_range(0..64);
            }
            self.last_time = now;
        }

        let mut id = String::with_capacity(TIME_LEN + RANDOM_LEN);
        let mut time = now.max(0);
        let mut time_chars = [0u8; TIME_LEN];
        for slot in time_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }
        id.extend(time_chars.iter().map(|&c| c as char));
        id.extend(self.last_random.iter().map(|&d| PUSH_CHARS[d as usize] as char));
        id
    }

    fn increment_random(&mut self) {
        for digit in self.last_random.iter_mut().rev() {
            if *digit == 63 {
                *digit = 0;
            } else {
                *digit += 1;
                return;
            }
        }
    }
}
