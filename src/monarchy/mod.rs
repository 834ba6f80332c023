//! The monarchy ledger: one title, one holder, one escalating price track.
//!
//! Anyone may take the title by paying at least [`Monarchy::claim_price`].
//! A 1% fee stays in the treasury for the owner, the rest goes to the holder
//! being displaced, and the price climbs by half. Value moves through the
//! [`LedgerState`] handed to each operation; state is only committed once the
//! transfers have gone through.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::identity::Address;
use crate::ledger::{Amount, LedgerError, LedgerState, Transfer};

pub mod config;
pub mod name;

pub use config::{ConfigError, MonarchyConfig};
pub use name::{MonarchName, NameTooLong};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonarchyError {
    #[error("payment {offered} is below the claim price {required}")]
    InsufficientPayment { required: Amount, offered: Amount },
    #[error("contract is paused")]
    SystemPaused,
    #[error("caller is not the current monarch")]
    NotHolder,
    #[error("caller is not the owner")]
    NotOwner,
    #[error("name is {len} bytes, at most {} fit", name::NAME_LEN)]
    NameTooLong { len: usize },
    #[error("claim price would overflow")]
    PriceOverflow,
    #[error("transfer failed: {0}")]
    Transfer(#[from] LedgerError),
}

impl From<NameTooLong> for MonarchyError {
    fn from(err: NameTooLong) -> Self {
        MonarchyError::NameTooLong { len: err.len }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MonarchyEvent {
    Crowned {
        monarch: Address,
        name: MonarchName,
        paid: Amount,
        fee: Amount,
        displaced: Address,
        refund: Amount,
    },
    Renounced {
        former: Address,
    },
    Paused,
    Unpaused,
    FeesSwept {
        to: Address,
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Monarchy {
    owner: Address,
    treasury: Address,
    monarch: Address,
    names: BTreeMap<Address, MonarchName>,
    claim_price: Amount,
    accumulated_fees: Amount,
    paused: bool,
    config: MonarchyConfig,
    #[serde(default)]
    events: Vec<MonarchyEvent>,
}

impl Monarchy {
    pub fn new(owner: Address) -> Self {
        Self::build(owner, MonarchyConfig::default())
    }

    /// Like [`Monarchy::new`] with a custom fee and price track. The config
    /// is validated first, so a zero divisor never reaches a claim.
    pub fn with_config(owner: Address, config: MonarchyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(owner, config))
    }

    fn build(owner: Address, config: MonarchyConfig) -> Self {
        let mut names = BTreeMap::new();
        names.insert(owner, MonarchName::vacant());
        Self {
            owner,
            treasury: Address::derived("treasury"),
            monarch: owner,
            names,
            claim_price: config.floor_price,
            accumulated_fees: 0,
            paused: false,
            config,
            events: Vec::new(),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn treasury(&self) -> Address {
        self.treasury
    }

    pub fn monarch(&self) -> Address {
        self.monarch
    }

    /// Recorded name for `who`; all zero bytes if it never held the title.
    pub fn monarch_name(&self, who: &Address) -> MonarchName {
        self.names.get(who).copied().unwrap_or_default()
    }

    pub fn claim_price(&self) -> Amount {
        self.claim_price
    }

    pub fn accumulated_fees(&self) -> Amount {
        self.accumulated_fees
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn config(&self) -> &MonarchyConfig {
        &self.config
    }

    pub fn events(&self) -> &[MonarchyEvent] {
        &self.events
    }

    /// Every recorded `(identity, name)` pair, ordered by identity.
    pub fn names(&self) -> impl Iterator<Item = (&Address, &MonarchName)> {
        self.names.iter()
    }

    /// Encodes `name` and claims with it; a name over 32 bytes never reaches
    /// the ledger.
    pub fn become_monarch_str(
        &mut self,
        bank: &mut LedgerState,
        caller: Address,
        name: &str,
        payment: Amount,
    ) -> Result<(), MonarchyError> {
        let name = MonarchName::encode(name)
            .map_err(|err| rejected("claim", &caller, err.into()))?;
        self.become_monarch(bank, caller, name, payment)
    }

    pub fn become_monarch(
        &mut self,
        bank: &mut LedgerState,
        caller: Address,
        name: MonarchName,
        payment: Amount,
    ) -> Result<(), MonarchyError> {
        if self.paused {
            return Err(rejected("claim", &caller, MonarchyError::SystemPaused));
        }
        if payment < self.claim_price {
            return Err(rejected(
                "claim",
                &caller,
                MonarchyError::InsufficientPayment {
                    required: self.claim_price,
                    offered: payment,
                },
            ));
        }

        let fee = self.config.fee_for(payment);
        let refund = payment - fee;
        let displaced = self.monarch;
        let next_price = self
            .config
            .escalate(self.claim_price)
            .ok_or_else(|| rejected("claim", &caller, MonarchyError::PriceOverflow))?;
        let accumulated_fees = self
            .accumulated_fees
            .checked_add(fee)
            .ok_or_else(|| rejected("claim", &caller, MonarchyError::PriceOverflow))?;
        debug!(%caller, %displaced, payment, fee, refund, next_price, "claim planned");

        bank.apply_transfers(&[
            Transfer::new(caller, self.treasury, payment, "claim payment"),
            Transfer::new(self.treasury, displaced, refund, "displaced monarch payout"),
        ])
        .map_err(|err| rejected("claim", &caller, err.into()))?;

        self.names.insert(caller, name);
        self.monarch = caller;
        self.accumulated_fees = accumulated_fees;
        self.claim_price = next_price;
        self.events.push(MonarchyEvent::Crowned {
            monarch: caller,
            name,
            paid: payment,
            fee,
            displaced,
            refund,
        });
        info!(monarch = %caller, %name, claim_price = next_price, "new monarch crowned");
        Ok(())
    }

    /// Hands the title back to the owner and resets the price ladder. Allowed
    /// while paused.
    pub fn renounce_monarchy(&mut self, caller: Address) -> Result<(), MonarchyError> {
        if caller != self.monarch {
            return Err(rejected("renounce", &caller, MonarchyError::NotHolder));
        }
        self.monarch = self.owner;
        self.names.insert(self.owner, MonarchName::vacant());
        self.claim_price = self.config.floor_price;
        self.events.push(MonarchyEvent::Renounced { former: caller });
        info!(former = %caller, "monarchy renounced");
        Ok(())
    }

    pub fn pause_contract(&mut self, caller: Address) -> Result<(), MonarchyError> {
        self.only_owner("pause", &caller)?;
        if !self.paused {
            self.paused = true;
            self.events.push(MonarchyEvent::Paused);
            info!("contract paused");
        }
        Ok(())
    }

    pub fn unpause_contract(&mut self, caller: Address) -> Result<(), MonarchyError> {
        self.only_owner("unpause", &caller)?;
        if self.paused {
            self.paused = false;
            self.events.push(MonarchyEvent::Unpaused);
            info!("contract unpaused");
        }
        Ok(())
    }

    pub fn sweep_fees(
        &mut self,
        bank: &mut LedgerState,
        caller: Address,
    ) -> Result<(), MonarchyError> {
        self.only_owner("sweep", &caller)?;
        let amount = self.accumulated_fees;
        bank.apply_transfers(&[Transfer::new(self.treasury, self.owner, amount, "fee sweep")])
            .map_err(|err| rejected("sweep", &caller, err.into()))?;
        self.accumulated_fees = 0;
        self.events.push(MonarchyEvent::FeesSwept {
            to: self.owner,
            amount,
        });
        info!(amount, "fees swept to owner");
        Ok(())
    }

    fn only_owner(&self, op: &'static str, caller: &Address) -> Result<(), MonarchyError> {
        if *caller != self.owner {
            return Err(rejected(op, caller, MonarchyError::NotOwner));
        }
        Ok(())
    }
}

fn rejected(op: &'static str, caller: &Address, err: MonarchyError) -> MonarchyError {
    warn!(op, %caller, error = %err, "operation rejected");
    err
}
