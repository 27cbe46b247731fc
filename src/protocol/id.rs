//! Call id generation.

use std::fmt;

/// Alphabet of URL-safe characters used for the random id base.
const ALPHABET: &[u8; 64] = b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";

/// Generates ids of the form `<base>-<n>`.
///
/// The base is a short random string chosen once per generator, `n` starts
/// at 1 and increases with every id, so ids are never reused within a
/// process and are unlikely to collide with ids from an earlier run.
///
/// # Examples
///
/// ```
/// use klipper_wire::protocol::IdGenerator;
///
/// let mut ids = IdGenerator::with_base("abcde");
/// assert_eq!(ids.next_id(), "abcde-1");
/// assert_eq!(ids.next_id(), "abcde-2");
/// ```
#[derive(Clone)]
pub struct IdGenerator {
    base: String,
    counter: u64,
}

impl IdGenerator {
    /// Create a generator with a random base of `len` characters.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let base = (0..len.max(1))
            .map(|_| char::from(ALPHABET[fastrand::usize(..ALPHABET.len())]))
            .collect::<String>();
        Self::with_base(base)
    }

    /// Create a generator with a fixed base.
    #[must_use]
    pub fn with_base(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            counter: 0,
        }
    }

    /// Random base shared by every id from this generator.
    #[must_use]
    pub fn base(&self) -> &str { &self.base }

    /// Produce the next id.
    pub fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}-{}", self.base, self.counter)
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("base", &self.base)
            .field("counter", &self.counter)
            .finish()
    }
}
