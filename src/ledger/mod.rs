use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::identity::Address;

pub type Amount = u128;

pub const WEI_PER_ETHER: Amount = 1_000_000_000_000_000_000; // 18-decimal native unit

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("account {account} is frozen")]
    FrozenAccount { account: Address },
    #[error("balance overflow in account {account}")]
    Overflow { account: Address },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("invalid amount {0:?}")]
    Invalid(String),
    #[error("amount {0:?} has more than 18 decimals")]
    TooPrecise(String),
    #[error("amount {0:?} does not fit")]
    Overflow(String),
}

/// Parses either a raw unit count (`100000000000000`) or a decimal amount
/// with an `ether` suffix (`0.0001ether`).
pub fn parse_amount(text: &str) -> Result<Amount, AmountError> {
    let text = text.trim();
    let Some(decimal) = text.strip_suffix("ether") else {
        return text
            .parse::<Amount>()
            .map_err(|_| AmountError::Invalid(text.to_string()));
    };
    let decimal = decimal.trim();
    let (whole, frac) = decimal.split_once('.').unwrap_or((decimal, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Invalid(text.to_string()));
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return Err(AmountError::Invalid(text.to_string()));
    }
    if frac.len() > 18 {
        return Err(AmountError::TooPrecise(text.to_string()));
    }
    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| AmountError::Overflow(text.to_string()))?
    };
    let frac_units: Amount = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<18}")
            .parse()
            .map_err(|_| AmountError::Invalid(text.to_string()))?
    };
    whole
        .checked_mul(WEI_PER_ETHER)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(|| AmountError::Overflow(text.to_string()))
}

/// Renders units as a decimal ether amount without trailing zeros.
pub fn format_ether(amount: Amount) -> String {
    let whole = amount / WEI_PER_ETHER;
    let frac = amount % WEI_PER_ETHER;
    if frac == 0 {
        return format!("{whole} ether");
    }
    let frac = format!("{frac:018}");
    format!("{whole}.{} ether", frac.trim_end_matches('0'))
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub available: Amount,
    #[serde(default)]
    pub frozen: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub memo: Option<String>,
}

impl Transfer {
    pub fn new(from: Address, to: Address, amount: Amount, memo: &str) -> Self {
        Self {
            from,
            to,
            amount,
            memo: Some(memo.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Deposit {
        to: Address,
        amount: Amount,
    },
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
        memo: Option<String>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub height: u64,
    pub accounts: BTreeMap<Address, AccountBalance>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

/// Native-currency balances. Every value movement the monarchy makes goes
/// through [`LedgerState::apply_transfers`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerState {
    pub height: u64,
    pub accounts: BTreeMap<Address, AccountBalance>,
    pub events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.accounts
            .get(account)
            .map(|b| b.available)
            .unwrap_or_default()
    }

    pub fn is_frozen(&self, account: &Address) -> bool {
        self.accounts.get(account).is_some_and(|b| b.frozen)
    }

    pub fn set_frozen(&mut self, account: &Address, frozen: bool) {
        self.accounts.entry(*account).or_default().frozen = frozen;
    }

    pub fn deposit(&mut self, to: &Address, amount: Amount) -> Result<(), LedgerError> {
        credit(&mut self.accounts, to, amount)?;
        self.events.push(LedgerEvent::Deposit { to: *to, amount });
        Ok(())
    }

    /// Applies a batch of transfers all-or-nothing. The batch is staged on a
    /// copy of the balances, so a failure at any step leaves the ledger as it was.
    pub fn apply_transfers(&mut self, transfers: &[Transfer]) -> Result<(), LedgerError> {
        let mut staged = self.accounts.clone();
        let mut events = Vec::with_capacity(transfers.len());

        for transfer in transfers {
            if transfer.amount == 0 {
                continue;
            }
            debit(&mut staged, &transfer.from, transfer.amount)?;
            credit(&mut staged, &transfer.to, transfer.amount)?;
            events.push(LedgerEvent::Transfer {
                from: transfer.from,
                to: transfer.to,
                amount: transfer.amount,
                memo: transfer.memo.clone(),
            });
        }

        debug!(transfers = events.len(), height = self.height + 1, "ledger batch committed");
        self.accounts = staged;
        self.events.extend(events);
        self.height += 1;
        Ok(())
    }

    /// Merkle root over the account balances alone.
    pub fn state_root(&self) -> [u8; 32] {
        compute_merkle_root(&self.accounts)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            height: self.height,
            accounts: self.accounts.clone(),
            events: self.events.clone(),
            state_root: self.state_root(),
        }
    }
}

fn credit(
    accounts: &mut BTreeMap<Address, AccountBalance>,
    account: &Address,
    amount: Amount,
) -> Result<(), LedgerError> {
    let balance = accounts.entry(*account).or_default();
    if balance.frozen {
        return Err(LedgerError::FrozenAccount { account: *account });
    }
    balance.available = balance
        .available
        .checked_add(amount)
        .ok_or(LedgerError::Overflow { account: *account })?;
    Ok(())
}

fn debit(
    accounts: &mut BTreeMap<Address, AccountBalance>,
    account: &Address,
    amount: Amount,
) -> Result<(), LedgerError> {
    let balance = accounts.get_mut(account);
    let available = balance.as_ref().map(|b| b.available).unwrap_or_default();
    match balance {
        Some(b) if b.frozen => Err(LedgerError::FrozenAccount { account: *account }),
        Some(b) if b.available >= amount => {
            b.available -= amount;
            Ok(())
        }
        _ => Err(LedgerError::InsufficientFunds {
            account: *account,
            needed: amount,
            available,
        }),
    }
}

fn compute_merkle_root(accounts: &BTreeMap<Address, AccountBalance>) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(accounts.len());
    for (account, balance) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.available.to_le_bytes());
        hasher.update([u8::from(balance.frozen)]);
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

/// Folds leaves pairwise into one root. A level with an odd count pairs its
/// last leaf with itself.
pub(crate) fn build_merkle(leaves: Vec<[u8; 32]>) -> [u8; 32] {
    let mut level = leaves;
    if level.is_empty() {
        return Sha256::digest(b"monarchy-ledger-empty").into();
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| -> [u8; 32] {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                Sha256::new()
                    .chain_update(b"node")
                    .chain_update(left)
                    .chain_update(right)
                    .finalize()
                    .into()
            })
            .collect();
    }
    level[0]
}

pub(crate) mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(label: &str) -> Address {
        Address::derived(label)
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let mut ledger = LedgerState::new();
        ledger.deposit(&addr("alice"), 1_000).unwrap();
        ledger.deposit(&addr("bob"), 2_000).unwrap();
        let root1 = ledger.snapshot().state_root;
        let root2 = ledger.snapshot().state_root;
        assert_eq!(root1, root2);

        ledger.deposit(&addr("carol"), 1).unwrap();
        assert_ne!(root1, ledger.snapshot().state_root);
    }

    #[test]
    fn odd_leaf_is_paired_with_itself() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let c = [3u8; 32];
        let node = |l: &[u8; 32], r: &[u8; 32]| -> [u8; 32] {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(l);
            hasher.update(r);
            hasher.finalize().into()
        };
        let expected = node(&node(&a, &b), &node(&c, &c));
        assert_eq!(build_merkle(vec![a, b, c]), expected);
        assert_eq!(build_merkle(vec![a]), a);
        assert_eq!(
            build_merkle(vec![]),
            <[u8; 32]>::from(Sha256::digest(b"monarchy-ledger-empty"))
        );
    }

    #[test]
    fn state_root_matches_snapshot_without_events() {
        let mut ledger = LedgerState::new();
        ledger.deposit(&addr("alice"), 7).unwrap();
        assert_eq!(ledger.state_root(), ledger.snapshot().state_root);
        ledger.events.clear();
        assert_eq!(ledger.state_root(), ledger.snapshot().state_root);
    }

    #[test]
    fn batch_moves_balances_and_records_events() {
        let mut ledger = LedgerState::new();
        ledger.deposit(&addr("treasury"), 10_000).unwrap();
        ledger
            .apply_transfers(&[
                Transfer::new(addr("treasury"), addr("alice"), 1_000, "grant"),
                Transfer::new(addr("alice"), addr("bob"), 400, "split"),
            ])
            .unwrap();
        assert_eq!(ledger.balance_of(&addr("treasury")), 9_000);
        assert_eq!(ledger.balance_of(&addr("alice")), 600);
        assert_eq!(ledger.balance_of(&addr("bob")), 400);
        assert_eq!(ledger.events.len(), 3);
        assert_eq!(ledger.height, 1);
    }

    #[test]
    fn failed_batch_leaves_ledger_untouched() {
        let mut ledger = LedgerState::new();
        ledger.deposit(&addr("alice"), 500).unwrap();
        let before = ledger.clone();

        let err = ledger
            .apply_transfers(&[
                Transfer::new(addr("alice"), addr("bob"), 300, "first"),
                Transfer::new(addr("bob"), addr("carol"), 301, "second"),
            ])
            .unwrap_err();
        match err {
            LedgerError::InsufficientFunds {
                account,
                needed,
                available,
            } => {
                assert_eq!(account, addr("bob"));
                assert_eq!(needed, 301);
                assert_eq!(available, 300);
            }
            _ => panic!("unexpected error"),
        }
        assert_eq!(ledger, before);
    }

    #[test]
    fn frozen_recipient_rejects_transfer() {
        let mut ledger = LedgerState::new();
        ledger.deposit(&addr("alice"), 500).unwrap();
        ledger.set_frozen(&addr("bob"), true);
        let err = ledger
            .apply_transfers(&[Transfer::new(addr("alice"), addr("bob"), 1, "x")])
            .unwrap_err();
        assert_eq!(err, LedgerError::FrozenAccount { account: addr("bob") });
        assert_eq!(ledger.balance_of(&addr("alice")), 500);
        assert!(ledger.deposit(&addr("bob"), 1).is_err());
    }

    #[test]
    fn zero_amount_transfers_are_skipped() {
        let mut ledger = LedgerState::new();
        ledger.set_frozen(&addr("owner"), true);
        ledger
            .apply_transfers(&[Transfer::new(addr("treasury"), addr("owner"), 0, "sweep")])
            .unwrap();
        assert!(ledger.events.is_empty());
        assert_eq!(ledger.height, 1);
    }

    #[test]
    fn amounts_parse_from_units_or_ether() {
        assert_eq!(parse_amount("100000000000000").unwrap(), 100_000_000_000_000);
        assert_eq!(parse_amount("0.0001ether").unwrap(), 100_000_000_000_000);
        assert_eq!(parse_amount("2 ether").unwrap(), 2 * WEI_PER_ETHER);
        assert_eq!(parse_amount(".5ether").unwrap(), WEI_PER_ETHER / 2);
        assert!(matches!(parse_amount("1.2.3ether"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("ether"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("-1"), Err(AmountError::Invalid(_))));
        assert!(matches!(
            parse_amount("0.0000000000000000001ether"),
            Err(AmountError::TooPrecise(_))
        ));
    }

    #[test]
    fn ether_formatting_trims_zeros() {
        assert_eq!(format_ether(100_000_000_000_000), "0.0001 ether");
        assert_eq!(format_ether(3 * WEI_PER_ETHER), "3 ether");
        assert_eq!(format_ether(WEI_PER_ETHER + 225_000_000_000_000), "1.000225 ether");
    }

    #[test]
    fn snapshot_serializes_root_as_hex() {
        let mut ledger = LedgerState::new();
        ledger.deposit(&addr("alice"), WEI_PER_ETHER).unwrap();
        let snap = ledger.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains(&hex::encode(snap.state_root)));
        let back: LedgerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
