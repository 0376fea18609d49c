//! Bundle type definitions

use ethers::types::{
    transaction::eip1559::Eip1559TransactionRequest, Address, Bytes, Signature, Transaction, H256,
    U256,
};
use serde::{Deserialize, Serialize};

/// EIP-2718 type tag of fee-market transactions
pub const EIP1559_TX_TYPE: u8 = 2;

/// A fully resolved, unsigned fee-market transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledTransaction {
    /// Network chain id
    pub chain_id: u64,

    /// Recipient contract
    pub to: Address,

    /// Encoded call data
    pub data: Bytes,

    /// Attached value in wei
    pub value: U256,

    /// Max priority fee per gas in wei
    pub max_priority_fee_per_gas: U256,

    /// Max fee per gas in wei
    pub max_fee_per_gas: U256,

    /// Gas limit; estimated at signing time when absent
    pub gas_limit: Option<U256>,

    /// Transaction type (always 2, EIP-1559)
    pub transaction_type: u8,
}

impl CompiledTransaction {
    /// Build the EIP-1559 request for a given sender
    pub fn to_request(&self, from: Address, nonce: Option<U256>, gas: Option<U256>) -> Eip1559TransactionRequest {
        let mut request = Eip1559TransactionRequest::new()
            .from(from)
            .to(self.to)
            .value(self.value)
            .data(self.data.clone())
            .max_fee_per_gas(self.max_fee_per_gas)
            .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
            .chain_id(self.chain_id);

        if let Some(nonce) = nonce {
            request = request.nonce(nonce);
        }
        if let Some(gas) = gas.or(self.gas_limit) {
            request = request.gas(gas);
        }
        request
    }
}

/// A compiled transaction plus its signature.
///
/// Identity is the signing account plus nonce; the hash and raw bytes are
/// fixed at signing time and never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hash: H256,
    pub from: Address,
    pub nonce: U256,
    pub gas_limit: U256,
    pub transaction: CompiledTransaction,
    /// Raw signed transaction bytes
    pub raw: Bytes,
}

impl PartialEq for SignedTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.nonce == other.nonce
    }
}

impl Eq for SignedTransaction {}

impl SignedTransaction {
    pub fn hash_hex(&self) -> String {
        format!("0x{:x}", self.hash)
    }

    pub fn member(&self) -> BundleMember {
        BundleMember {
            hash: self.hash,
            from: self.from,
            nonce: self.nonce,
        }
    }
}

/// A pending pool transaction captured for front-running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedPendingTransaction {
    pub hash: H256,
    pub from: Address,
    pub nonce: U256,
    pub signature: Signature,
    /// Serialized signed transaction, submitted unmodified
    pub raw: Bytes,
}

impl CapturedPendingTransaction {
    /// Capture a transaction observed in the pool
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            hash: tx.hash,
            from: tx.from,
            nonce: tx.nonce,
            signature: Signature {
                r: tx.r,
                s: tx.s,
                v: tx.v.as_u64(),
            },
            raw: tx.rlp(),
        }
    }

    pub fn member(&self) -> BundleMember {
        BundleMember {
            hash: self.hash,
            from: self.from,
            nonce: self.nonce,
        }
    }
}

/// Identity of one bundle entry, used to resolve inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BundleMember {
    pub hash: H256,
    pub from: Address,
    pub nonce: U256,
}

/// Ordered bundle: optional captured prefix, then locally signed transactions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub prefix: Option<CapturedPendingTransaction>,
    pub transactions: Vec<SignedTransaction>,
}

impl Bundle {
    pub fn is_empty(&self) -> bool {
        self.prefix.is_none() && self.transactions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transactions.len() + usize::from(self.prefix.is_some())
    }

    pub fn has_prefix(&self) -> bool {
        self.prefix.is_some()
    }

    /// Raw signed bytes in submission order, prefix first
    pub fn raw_transactions(&self) -> Vec<Bytes> {
        self.prefix
            .iter()
            .map(|p| p.raw.clone())
            .chain(self.transactions.iter().map(|tx| tx.raw.clone()))
            .collect()
    }

    /// Member identities in submission order, prefix first
    pub fn members(&self) -> Vec<BundleMember> {
        self.prefix
            .iter()
            .map(CapturedPendingTransaction::member)
            .chain(self.transactions.iter().map(SignedTransaction::member))
            .collect()
    }

    /// The same locally signed transactions without the captured prefix
    pub fn without_prefix(&self) -> Bundle {
        Bundle {
            prefix: None,
            transactions: self.transactions.clone(),
        }
    }

    /// Native value carried by the local transactions, saturating at `U256::MAX`
    pub fn total_value(&self) -> U256 {
        self.transactions
            .iter()
            .fold(U256::zero(), |acc, tx| acc.saturating_add(tx.transaction.value))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn signed_tx(from: Address, nonce: u64, raw: &[u8]) -> SignedTransaction {
        SignedTransaction {
            hash: H256::random(),
            from,
            nonce: U256::from(nonce),
            gas_limit: U256::from(21000),
            transaction: CompiledTransaction {
                chain_id: 1,
                to: Address::random(),
                data: Bytes::default(),
                value: U256::exp10(18),
                max_priority_fee_per_gas: U256::from(2_000_000_000u64),
                max_fee_per_gas: U256::from(50_000_000_000u64),
                gas_limit: Some(U256::from(21000)),
                transaction_type: EIP1559_TX_TYPE,
            },
            raw: Bytes::from(raw.to_vec()),
        }
    }

    pub(crate) fn captured_tx(raw: &[u8]) -> CapturedPendingTransaction {
        CapturedPendingTransaction {
            hash: H256::random(),
            from: Address::random(),
            nonce: U256::from(7),
            signature: Signature {
                r: U256::one(),
                s: U256::one(),
                v: 1,
            },
            raw: Bytes::from(raw.to_vec()),
        }
    }

    #[test]
    fn test_raw_transactions_put_prefix_first() {
        let bundle = Bundle {
            prefix: Some(captured_tx(&[0xaa])),
            transactions: vec![
                signed_tx(Address::random(), 0, &[0x01]),
                signed_tx(Address::random(), 0, &[0x02]),
            ],
        };

        let raw = bundle.raw_transactions();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].as_ref(), &[0xaa]);
        assert_eq!(raw[2].as_ref(), &[0x02]);
        assert_eq!(bundle.members().len(), 3);
        assert_eq!(bundle.total_value(), U256::exp10(18) * 2);
    }

    #[test]
    fn test_total_value_saturates() {
        let mut whale = signed_tx(Address::random(), 0, &[0x01]);
        whale.transaction.value = U256::MAX;
        let bundle = Bundle {
            prefix: None,
            transactions: vec![whale, signed_tx(Address::random(), 1, &[0x02])],
        };

        assert_eq!(bundle.total_value(), U256::MAX);
    }

    #[test]
    fn test_without_prefix_keeps_local_transactions() {
        let bundle = Bundle {
            prefix: Some(captured_tx(&[0xaa])),
            transactions: vec![signed_tx(Address::random(), 3, &[0x01])],
        };

        let stripped = bundle.without_prefix();
        assert!(!stripped.has_prefix());
        assert_eq!(stripped.transactions, bundle.transactions);
        assert_eq!(stripped.len(), 1);
    }

    #[test]
    fn test_signed_transaction_identity_is_sender_and_nonce() {
        let from = Address::random();
        let a = signed_tx(from, 4, &[0x01]);
        let b = signed_tx(from, 4, &[0x02]);
        let c = signed_tx(from, 5, &[0x01]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_compiled_request_carries_fee_fields() {
        let tx = signed_tx(Address::random(), 0, &[]).transaction;
        let request = tx.to_request(Address::random(), Some(U256::from(9)), None);

        assert_eq!(request.max_fee_per_gas, Some(U256::from(50_000_000_000u64)));
        assert_eq!(request.max_priority_fee_per_gas, Some(U256::from(2_000_000_000u64)));
        assert_eq!(request.gas, Some(U256::from(21000)));
        assert_eq!(request.nonce, Some(U256::from(9)));
    }
}
