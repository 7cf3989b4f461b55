//! Shuffle-sharding dealer.
//!
//! Deals a hand of `hand_size` distinct cards out of `0..deck_size`, using a
//! 64-bit hash as the only source of randomness. The same hash always deals
//! the same hand, and distinct hashes are spread close to uniformly over all
//! possible hands.
//!
//! The hash is consumed as a mixed-radix number: the first card is
//! `hash mod deck`, the next is `(hash / deck) mod (deck - 1)`, and so on.
//! Each remainder is then shifted past the cards already dealt, which is a
//! partial Fisher-Yates shuffle without materializing the deck.

use crate::error::{FairQueueError, FairQueueResult};

/// Most hash bits a hand may consume.
pub const MAX_HASH_BITS: u32 = 60;

/// Largest supported deck.
pub const MAX_DECK_SIZE: u32 = 1 << 26;

/// Returns the hash bits needed to deal `hand_size` cards from `deck_size`,
/// that is `ceil(log2(deck_size) × hand_size)`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Bounded by the inputs.
pub fn required_entropy_bits(deck_size: u32, hand_size: u32) -> u32 {
    (f64::from(deck_size).log2() * f64::from(hand_size)).ceil() as u32
}

/// Deterministic hand dealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dealer {
    deck_size: u32,
    hand_size: u32,
}

impl Dealer {
    /// Creates a dealer.
    ///
    /// # Errors
    ///
    /// Returns `FairQueueError::InvalidConfig` if either size is zero, the
    /// hand is larger than the deck, the deck exceeds [`MAX_DECK_SIZE`], or
    /// the hand needs more than [`MAX_HASH_BITS`] bits of entropy.
    pub fn new(deck_size: u32, hand_size: u32) -> FairQueueResult<Self> {
        if deck_size == 0 || hand_size == 0 {
            return Err(FairQueueError::InvalidConfig {
                message: format!(
                    "deck size ({deck_size}) and hand size ({hand_size}) must be positive"
                ),
            });
        }
        if hand_size > deck_size {
            return Err(FairQueueError::InvalidConfig {
                message: format!("hand size ({hand_size}) exceeds deck size ({deck_size})"),
            });
        }
        if deck_size > MAX_DECK_SIZE {
            return Err(FairQueueError::InvalidConfig {
                message: format!("deck size ({deck_size}) exceeds {MAX_DECK_SIZE}"),
            });
        }
        let bits = required_entropy_bits(deck_size, hand_size);
        if bits > MAX_HASH_BITS {
            return Err(FairQueueError::InvalidConfig {
                message: format!(
                    "deck size {deck_size} with hand size {hand_size} needs {bits} hash bits, \
                     more than {MAX_HASH_BITS}"
                ),
            });
        }

        Ok(Self {
            deck_size,
            hand_size,
        })
    }

    /// Returns the deck size.
    #[must_use]
    pub const fn deck_size(&self) -> u32 {
        self.deck_size
    }

    /// Returns the hand size.
    #[must_use]
    pub const fn hand_size(&self) -> u32 {
        self.hand_size
    }

    /// Deals a hand for `hash`, calling `pick` once per card in deal order.
    pub fn deal(&self, mut hash: u64, mut pick: impl FnMut(u32)) {
        let hand = self.hand_size as usize;
        let mut remainders = Vec::with_capacity(hand);

        for i in 0..self.hand_size {
            let radix = u64::from(self.deck_size - i);
            let next = hash / radix;
            // The remainder is below `deck_size`, which fits in u32.
            #[allow(clippy::cast_possible_truncation)]
            remainders.push((hash - radix * next) as u32);
            hash = next;
        }

        for (i, &remainder) in remainders.iter().enumerate() {
            let mut card = remainder;
            for &earlier in remainders[..i].iter().rev() {
                if card >= earlier {
                    card += 1;
                }
            }
            pick(card);
        }
    }

    /// Deals a hand for `hash` into `hand`, replacing its contents.
    pub fn deal_into_hand(&self, hash: u64, hand: &mut Vec<u32>) {
        hand.clear();
        hand.reserve(self.hand_size as usize);
        self.deal(hash, |card| hand.push(card));
    }
}
