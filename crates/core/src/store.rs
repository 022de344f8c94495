//! Persistence contract: a byte-addressable key-value store with atomic
//! single-key writes, plus the key layout and raw-transaction wire
//! format used on top of it.
//!
//! The store itself is an external collaborator — this module defines
//! only the seam (`KvStore`) and an in-memory implementation
//! (`MemStore`) good enough for an embedded single-process deployment
//! and for the whole test suite. A disk-backed adapter implements the
//! same trait; it is not shipped here.

use std::collections::{HashMap, VecDeque};

use alloy::primitives::{Address, Bytes, B256, U256};
use parking_lot::RwLock;

use crate::raw_tx::{Payload, PendingVariant, RawTransaction};

/// Atomic per-key reads and writes. `put_many` commits its whole batch
/// together — used for the `pending`/`unconfirmed` whole-list keys so a
/// crash can never observe one updated without the other.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, key: &[u8], value: &[u8]);
    fn put_many(&self, entries: &[(Vec<u8>, Vec<u8>)]);
}

/// In-process store guarded by a single lock. No persistence across
/// process restarts; suitable for tests and for embedding this manager
/// inside a process that already keeps its own durability elsewhere.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.read().get(key).cloned()
    }

    fn put(&self, key: &[u8], value: &[u8]) {
        self.inner.write().insert(key.to_vec(), value.to_vec());
    }

    fn put_many(&self, entries: &[(Vec<u8>, Vec<u8>)]) {
        let mut inner = self.inner.write();
        for (key, value) in entries {
            inner.insert(key.clone(), value.clone());
        }
    }
}

// --- Key layout (see spec §4.A) ---------------------------------------

pub fn key_num_addr() -> Vec<u8> {
    b"numAddr".to_vec()
}

pub fn key_addr(i: u64) -> Vec<u8> {
    format!("addr[{i}]").into_bytes()
}

pub fn key_nonce(addr: Address) -> Vec<u8> {
    format!("nonce[{addr}]").into_bytes()
}

pub fn key_num_raw(addr: Address) -> Vec<u8> {
    format!("numRaw[{addr}]").into_bytes()
}

pub fn key_raw_hash(addr: Address, hash: B256) -> Vec<u8> {
    format!("rawHash[{addr}][{hash}]").into_bytes()
}

pub fn key_pending(addr: Address) -> Vec<u8> {
    format!("pending[{addr}]").into_bytes()
}

pub fn key_unconfirmed(addr: Address) -> Vec<u8> {
    format!("unconfirmed[{addr}]").into_bytes()
}

pub fn key_num_confirmed(addr: Address) -> Vec<u8> {
    format!("numConfirmed[{addr}]").into_bytes()
}

pub fn key_confirmed(addr: Address, j: u64) -> Vec<u8> {
    format!("confirmed[{addr}][{j}]").into_bytes()
}

pub fn key_gas_price() -> Vec<u8> {
    b"gasPrice".to_vec()
}

// --- Small scalar encodings, used for the single-value keys above ------

pub fn encode_u64(v: u64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

pub fn decode_u64(bytes: &[u8]) -> Result<u64, String> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| "bad u64 encoding".to_string())?;
    Ok(u64::from_be_bytes(arr))
}

pub fn encode_u128(v: u128) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

pub fn decode_u128(bytes: &[u8]) -> Result<u128, String> {
    let arr: [u8; 16] = bytes.try_into().map_err(|_| "bad u128 encoding".to_string())?;
    Ok(u128::from_be_bytes(arr))
}

pub fn encode_address(addr: Address) -> Vec<u8> {
    addr.as_slice().to_vec()
}

pub fn decode_address(bytes: &[u8]) -> Result<Address, String> {
    if bytes.len() != 20 {
        return Err("bad address encoding".to_string());
    }
    Ok(Address::from_slice(bytes))
}

// --- Raw-transaction wire format ---------------------------------------
//
// One version byte followed by fixed-width fields and length-prefixed
// variable fields, so a future field can be appended without breaking
// recovery of records written by an older version. A generic
// serde/bincode encoding of the struct would not give that guarantee:
// adding a field shifts every byte offset for every older record.

const RAW_FORMAT_VERSION: u8 = 1;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn u128(&mut self, v: u128) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn bytes32(&mut self, v: &[u8; 32]) {
        self.buf.extend_from_slice(v);
    }
    fn addr(&mut self, v: Address) {
        self.buf.extend_from_slice(v.as_slice());
    }
    fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }
    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }
    fn opt_string(&mut self, v: &Option<String>) {
        match v {
            Some(s) => {
                self.bool(true);
                self.bytes(s.as_bytes());
            }
            None => self.bool(false),
        }
    }
    fn opt_u64(&mut self, v: Option<u64>) {
        match v {
            Some(n) => {
                self.bool(true);
                self.u64(n);
            }
            None => self.bool(false),
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn u8(&mut self) -> Result<u8, String> {
        let b = *self.buf.get(self.pos).ok_or("unexpected end of buffer")?;
        self.pos += 1;
        Ok(b)
    }
    fn u32(&mut self) -> Result<u32, String> {
        let slice = self
            .buf
            .get(self.pos..self.pos + 4)
            .ok_or("unexpected end of buffer")?;
        self.pos += 4;
        Ok(u32::from_be_bytes(slice.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64, String> {
        let slice = self
            .buf
            .get(self.pos..self.pos + 8)
            .ok_or("unexpected end of buffer")?;
        self.pos += 8;
        Ok(u64::from_be_bytes(slice.try_into().unwrap()))
    }
    fn u128(&mut self) -> Result<u128, String> {
        let slice = self
            .buf
            .get(self.pos..self.pos + 16)
            .ok_or("unexpected end of buffer")?;
        self.pos += 16;
        Ok(u128::from_be_bytes(slice.try_into().unwrap()))
    }
    fn bytes32(&mut self) -> Result<[u8; 32], String> {
        let slice = self
            .buf
            .get(self.pos..self.pos + 32)
            .ok_or("unexpected end of buffer")?;
        self.pos += 32;
        Ok(slice.try_into().unwrap())
    }
    fn addr(&mut self) -> Result<Address, String> {
        let slice = self
            .buf
            .get(self.pos..self.pos + 20)
            .ok_or("unexpected end of buffer")?;
        self.pos += 20;
        Ok(Address::from_slice(slice))
    }
    fn bool(&mut self) -> Result<bool, String> {
        Ok(self.u8()? != 0)
    }
    fn bytes(&mut self) -> Result<Vec<u8>, String> {
        let len = self.u32()? as usize;
        let slice = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or("unexpected end of buffer")?;
        self.pos += len;
        Ok(slice.to_vec())
    }
    fn opt_string(&mut self) -> Result<Option<String>, String> {
        if self.bool()? {
            let bytes = self.bytes()?;
            Ok(Some(String::from_utf8(bytes).map_err(|e| e.to_string())?))
        } else {
            Ok(None)
        }
    }
    fn opt_u64(&mut self) -> Result<Option<u64>, String> {
        if self.bool()? {
            Ok(Some(self.u64()?))
        } else {
            Ok(None)
        }
    }
}

pub fn encode_raw(raw: &RawTransaction) -> Vec<u8> {
    let mut w = Writer::new();
    w.u8(RAW_FORMAT_VERSION);
    w.u64(raw.index);
    w.u64(raw.nonce);
    w.addr(raw.from);
    w.bytes32(&raw.raw_hash.0);

    w.addr(raw.payload.to);
    w.bytes32(&raw.payload.value.to_be_bytes::<32>());
    w.bytes(&raw.payload.data);
    w.u64(raw.payload.gas_limit);
    w.opt_string(&raw.payload.caption);

    w.u32(raw.pending_txs.len() as u32);
    for variant in &raw.pending_txs {
        w.bytes32(&variant.hash.0);
        w.u64(variant.nonce);
        w.u128(variant.gas_price);
        w.u64(variant.sent_at_block);
    }

    w.bytes32(&raw.mined_tx_hash.0);
    w.u64(raw.mined_block_number);
    w.bytes32(&raw.mined_block_hash.0);
    w.bool(raw.reverted);
    w.bool(raw.allow_revert);
    w.opt_u64(raw.confirmed_index);
    w.u64(raw.last_sent_block_number);
    w.u32(raw.known_tx_streak);

    w.buf
}

pub fn decode_raw(bytes: &[u8]) -> Result<RawTransaction, String> {
    let mut r = Reader::new(bytes);
    let version = r.u8()?;
    if version != RAW_FORMAT_VERSION {
        return Err(format!("unsupported raw transaction format version {version}"));
    }

    let index = r.u64()?;
    let nonce = r.u64()?;
    let from = r.addr()?;
    let raw_hash = B256::from(r.bytes32()?);

    let to = r.addr()?;
    let value = U256::from_be_bytes(r.bytes32()?);
    let data = Bytes::from(r.bytes()?);
    let gas_limit = r.u64()?;
    let caption = r.opt_string()?;

    let variant_count = r.u32()?;
    let mut pending_txs = Vec::with_capacity(variant_count as usize);
    for _ in 0..variant_count {
        let hash = B256::from(r.bytes32()?);
        let v_nonce = r.u64()?;
        let gas_price = r.u128()?;
        let sent_at_block = r.u64()?;
        pending_txs.push(PendingVariant {
            hash,
            nonce: v_nonce,
            gas_price,
            sent_at_block,
        });
    }

    let mined_tx_hash = B256::from(r.bytes32()?);
    let mined_block_number = r.u64()?;
    let mined_block_hash = B256::from(r.bytes32()?);
    let reverted = r.bool()?;
    let allow_revert = r.bool()?;
    let confirmed_index = r.opt_u64()?;
    let last_sent_block_number = r.u64()?;
    let known_tx_streak = r.u32()?;

    Ok(RawTransaction {
        index,
        nonce,
        from,
        payload: Payload {
            to,
            value,
            data,
            gas_limit,
            caption,
        },
        pending_txs,
        mined_tx_hash,
        mined_block_number,
        mined_block_hash,
        reverted,
        allow_revert,
        confirmed_index,
        last_sent_block_number,
        known_tx_streak,
        raw_hash,
    })
}

/// Encode a whole ordered list of raws (a `pending`/`unconfirmed` key),
/// as a `u32` count followed by each `encode_raw` record length-prefixed.
pub fn encode_raw_list<'a>(raws: impl Iterator<Item = &'a RawTransaction>) -> Vec<u8> {
    let mut w = Writer::new();
    let items: Vec<Vec<u8>> = raws.map(encode_raw).collect();
    w.u32(items.len() as u32);
    for item in items {
        w.bytes(&item);
    }
    w.buf
}

pub fn decode_raw_list(bytes: &[u8]) -> Result<VecDeque<RawTransaction>, String> {
    let mut r = Reader::new(bytes);
    let count = r.u32()?;
    let mut out = VecDeque::with_capacity(count as usize);
    for _ in 0..count {
        let item = r.bytes()?;
        out.push_back(decode_raw(&item)?);
    }
    Ok(out)
}

// --- Whole-account persistence helpers ---------------------------------
//
// These compose the key layout and wire format above into the
// operations the manager actually performs. `persist_queues` commits
// `pending` and `unconfirmed` together via `put_many` per the §4.A
// shutdown-channel discipline: skipping either half would let a crash
// observe one updated without the other, violating invariant 1.

pub fn persist_queues(store: &dyn KvStore, addr: Address, pending: &VecDeque<RawTransaction>, unconfirmed: &VecDeque<RawTransaction>) {
    store.put_many(&[
        (key_pending(addr), encode_raw_list(pending.iter())),
        (key_unconfirmed(addr), encode_raw_list(unconfirmed.iter())),
    ]);
}

/// Append one raw to the durable `confirmed` log at position `j` and
/// bump `numConfirmed[addr]` to `j + 1`. Keyed individually per spec
/// §4.A ("confirmed[addr][j]"), unlike the whole-list `pending`/
/// `unconfirmed` keys.
pub fn persist_confirmed_append(store: &dyn KvStore, addr: Address, j: u64, raw: &RawTransaction) {
    store.put(&key_confirmed(addr, j), &encode_raw(raw));
    store.put(&key_num_confirmed(addr), &encode_u64(j + 1));
}

pub fn persist_nonce(store: &dyn KvStore, addr: Address, nonce: u64) {
    store.put(&key_nonce(addr), &encode_u64(nonce));
}

pub fn persist_num_raw(store: &dyn KvStore, addr: Address, num_raw: u64) {
    store.put(&key_num_raw(addr), &encode_u64(num_raw));
}

pub fn persist_raw_hash_index(store: &dyn KvStore, addr: Address, hash: B256, index: u64) {
    store.put(&key_raw_hash(addr, hash), &encode_u64(index));
}

/// Register account `i` at `addr[i]` and bump `numAddr` to `i + 1`.
pub fn persist_new_account(store: &dyn KvStore, i: u64, addr: Address) {
    store.put(&key_addr(i), &encode_address(addr));
    store.put(&key_num_addr(), &encode_u64(i + 1));
}

pub fn load_num_addr(store: &dyn KvStore) -> u64 {
    store
        .get(&key_num_addr())
        .and_then(|b| decode_u64(&b).ok())
        .unwrap_or(0)
}

pub fn load_addr(store: &dyn KvStore, i: u64) -> Result<Address, String> {
    let bytes = store
        .get(&key_addr(i))
        .ok_or_else(|| format!("missing addr[{i}]"))?;
    decode_address(&bytes)
}

pub fn load_nonce(store: &dyn KvStore, addr: Address) -> u64 {
    store
        .get(&key_nonce(addr))
        .and_then(|b| decode_u64(&b).ok())
        .unwrap_or(0)
}

pub fn load_num_raw(store: &dyn KvStore, addr: Address) -> u64 {
    store
        .get(&key_num_raw(addr))
        .and_then(|b| decode_u64(&b).ok())
        .unwrap_or(0)
}

pub fn load_num_confirmed(store: &dyn KvStore, addr: Address) -> u64 {
    store
        .get(&key_num_confirmed(addr))
        .and_then(|b| decode_u64(&b).ok())
        .unwrap_or(0)
}

pub fn load_queue(store: &dyn KvStore, key: Vec<u8>) -> VecDeque<RawTransaction> {
    store
        .get(&key)
        .and_then(|b| decode_raw_list(&b).ok())
        .unwrap_or_default()
}

pub fn load_confirmed(store: &dyn KvStore, addr: Address, count: u64) -> Vec<RawTransaction> {
    (0..count)
        .filter_map(|j| store.get(&key_confirmed(addr, j)))
        .filter_map(|b| decode_raw(&b).ok())
        .collect()
}

pub fn raw_hash_exists(store: &dyn KvStore, addr: Address, hash: B256) -> bool {
    store.get(&key_raw_hash(addr, hash)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw_tx::hash_payload;

    fn sample_raw() -> RawTransaction {
        let payload = Payload {
            to: Address::repeat_byte(0x02),
            value: U256::from(100u64),
            data: Bytes::from(vec![1, 2, 3]),
            gas_limit: 21_000,
            caption: Some("withdrawal".to_string()),
        };
        let from = Address::repeat_byte(0x01);
        let raw_hash = hash_payload(from, &payload);
        let mut raw = RawTransaction::new(0, 0, from, payload, false, raw_hash);
        raw.pending_txs.push(PendingVariant {
            hash: B256::repeat_byte(0xaa),
            nonce: 0,
            gas_price: 10_000_000_000,
            sent_at_block: 99,
        });
        raw.confirmed_index = Some(3);
        raw
    }

    #[test]
    fn round_trips_a_raw_transaction() {
        let raw = sample_raw();
        let encoded = encode_raw(&raw);
        let decoded = decode_raw(&encoded).unwrap();
        assert_eq!(decoded.index, raw.index);
        assert_eq!(decoded.from, raw.from);
        assert_eq!(decoded.payload.caption, raw.payload.caption);
        assert_eq!(decoded.pending_txs, raw.pending_txs);
        assert_eq!(decoded.confirmed_index, raw.confirmed_index);
    }

    #[test]
    fn round_trips_a_raw_list() {
        let raws: VecDeque<RawTransaction> = (0..3)
            .map(|i| {
                let mut r = sample_raw();
                r.index = i;
                r
            })
            .collect();
        let encoded = encode_raw_list(raws.iter());
        let decoded = decode_raw_list(&encoded).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].index, 1);
    }

    #[test]
    fn scalar_encodings_round_trip() {
        assert_eq!(decode_u64(&encode_u64(42)).unwrap(), 42);
        assert_eq!(decode_u128(&encode_u128(10_000_000_000)).unwrap(), 10_000_000_000);
        let addr = Address::repeat_byte(0x07);
        assert_eq!(decode_address(&encode_address(addr)).unwrap(), addr);
    }

    #[test]
    fn mem_store_put_many_is_visible_to_get() {
        let store = MemStore::new();
        store.put_many(&[(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
        assert_eq!(store.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn account_lifecycle_persists_and_restores() {
        let store = MemStore::new();
        let addr = Address::repeat_byte(0x09);

        persist_new_account(&store, 0, addr);
        persist_nonce(&store, addr, 3);
        persist_num_raw(&store, addr, 1);

        let raw = sample_raw();
        let hash = raw.raw_hash;
        persist_raw_hash_index(&store, addr, hash, 0);

        let pending: VecDeque<RawTransaction> = VecDeque::from([raw.clone()]);
        let unconfirmed: VecDeque<RawTransaction> = VecDeque::new();
        persist_queues(&store, addr, &pending, &unconfirmed);

        assert_eq!(load_num_addr(&store), 1);
        assert_eq!(load_addr(&store, 0).unwrap(), addr);
        assert_eq!(load_nonce(&store, addr), 3);
        assert_eq!(load_num_raw(&store, addr), 1);
        assert!(raw_hash_exists(&store, addr, hash));
        assert_eq!(load_queue(&store, key_pending(addr)).len(), 1);
        assert!(load_queue(&store, key_unconfirmed(addr)).is_empty());

        persist_confirmed_append(&store, addr, 0, &raw);
        assert_eq!(load_num_confirmed(&store, addr), 1);
        assert_eq!(load_confirmed(&store, addr, 1).len(), 1);
    }
}
