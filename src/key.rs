//! key 派生模块
//! 把逻辑序号映射为定长的 Keccak-256 摘要

use crate::config::KEY_LEN;
use sha3::{Digest, Keccak256};

/// 定长 key
pub type Key = [u8; KEY_LEN];

/// 把序号以大端写入 key 的低 8 字节，高位保持为 0
#[inline]
pub fn encode_index(index: u64) -> Key {
    let mut buf = [0u8; KEY_LEN];
    buf[KEY_LEN - 8..].copy_from_slice(&index.to_be_bytes());
    buf
}

/// key 派生器
///
/// 内部持有哈希状态，`derive` 需要 `&mut self`，
/// 每个工作线程各自构造一个，不在线程间共享。
pub struct KeyDeriver {
    hasher: Keccak256,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyDeriver {
    pub fn new() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }

    /// 派生序号对应的 key
    pub fn derive(&mut self, index: u64) -> Key {
        Digest::update(&mut self.hasher, encode_index(index));
        let digest = self.hasher.finalize_reset();
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        key
    }
}
