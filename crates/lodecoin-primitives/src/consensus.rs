//! Consensus constants.

/// One bitcoin in satoshis.
pub const COIN: i64 = 100_000_000;

/// Maximum amount of money in existence.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// Maximum serialized block size, excluding witness data.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Maximum block weight as defined by BIP 141.
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// Upper bound on the fully serialized size of a block, witness included.
///
/// Sizing bound for reusable serialization buffers.
pub const MAX_RAW_BLOCK_SIZE: usize = 4_000_000;

/// Scale factor between weight units and virtual bytes.
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Number of blocks before a coinbase output may be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Lock times below this threshold are block heights, above it unix times.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Block weight granted per counted signature operation.
pub const BYTES_PER_SIGOP: usize = 20;

/// Maximum script length in bytes.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum size of a standard push element.
pub const MAX_SCRIPT_PUSH: usize = 520;

/// Sequence value that disables lock-time semantics for an input.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// BIP 68: sequence values with this bit set have no relative-lock meaning.
pub const SEQUENCE_DISABLE_FLAG: u32 = 1 << 31;

/// BIP 68: set when the relative lock time is time-based rather than
/// height-based.
pub const SEQUENCE_TYPE_FLAG: u32 = 1 << 22;

/// BIP 68: mask extracting the relative lock-time value.
pub const SEQUENCE_MASK: u32 = 0x0000_ffff;

/// Minimum length of a coinbase script.
pub const MIN_COINBASE_SCRIPT_LEN: usize = 2;

/// Maximum length of a coinbase script.
pub const MAX_COINBASE_SCRIPT_LEN: usize = 100;
