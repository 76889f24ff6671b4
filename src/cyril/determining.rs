//! Prepare-time resolution: does a determining transfer exist, which accounts
//! must be validated, and which single account a PREPARE reserves against.

use super::{Cyril, CyrilError, ProxyObligation};
use crate::domain::{
    Currency, Decimal, FxTransferPrepare, FxTransferType, ParticipantName, StateEnumeration,
    Transfer, TransferId, TransferPrepare, WatchListEntry,
};
use tracing::{debug, info};

/// A (participant, currency) pair whose position account must be active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantCurrency {
    pub participant_name: ParticipantName,
    pub currency: Currency,
}

impl ParticipantCurrency {
    fn new(participant_name: &ParticipantName, currency: &Currency) -> Self {
        ParticipantCurrency {
            participant_name: participant_name.clone(),
            currency: currency.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeterminingTransferCheck {
    /// For a transfer: some FX leg is already registered against it.
    /// For an FX leg: its determining transfer is already on file.
    pub determining_transfer_exists: bool,
    pub watch_list: Vec<WatchListEntry>,
    pub determining_transfer: Option<Transfer>,
    pub participant_currency_validation_list: Vec<ParticipantCurrency>,
}

/// The account a PREPARE reserves against, by participant and currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionParticipant {
    pub participant_name: ParticipantName,
    pub currency: Currency,
    pub amount: Decimal,
}

impl Cyril {
    pub async fn check_if_determining_transfer_exists_for_transfer(
        &self,
        prepare: &TransferPrepare,
        proxy: &ProxyObligation,
    ) -> Result<DeterminingTransferCheck, CyrilError> {
        let watch_list = self
            .repo
            .get_watch_list_by_determining_transfer_id(&prepare.transfer_id)
            .await?;
        let currency = &prepare.amount.currency;

        let mut validation = Vec::new();
        if !watch_list.is_empty() {
            if !proxy.is_counter_party_fsp_proxy() {
                validation.push(ParticipantCurrency::new(&prepare.payee_fsp, currency));
            }
        } else {
            if !proxy.is_initiating_fsp_proxy() {
                validation.push(ParticipantCurrency::new(&prepare.payer_fsp, currency));
            }
            if self.payee_currency_validation && !proxy.is_counter_party_fsp_proxy() {
                validation.push(ParticipantCurrency::new(&prepare.payee_fsp, currency));
            }
        }

        debug!(
            transfer_id = %prepare.transfer_id,
            watch_list_entries = watch_list.len(),
            "determining transfer check"
        );

        Ok(DeterminingTransferCheck {
            determining_transfer_exists: !watch_list.is_empty(),
            watch_list,
            determining_transfer: None,
            participant_currency_validation_list: validation,
        })
    }

    pub async fn check_if_determining_transfer_exists_for_fx_transfer(
        &self,
        prepare: &FxTransferPrepare,
        proxy: &ProxyObligation,
    ) -> Result<DeterminingTransferCheck, CyrilError> {
        let determining_transfer = self
            .repo
            .get_transfer(&prepare.determining_transfer_id)
            .await?;
        let exists = determining_transfer.is_some();

        let mut validation = Vec::new();
        if !proxy.is_counter_party_fsp_proxy() {
            validation.push(ParticipantCurrency::new(
                &prepare.counter_party_fsp,
                &prepare.source_amount.currency,
            ));
            validation.push(ParticipantCurrency::new(
                &prepare.counter_party_fsp,
                &prepare.target_amount.currency,
            ));
        }
        if !proxy.is_initiating_fsp_proxy() {
            let currency = if exists {
                &prepare.target_amount.currency
            } else {
                &prepare.source_amount.currency
            };
            validation.push(ParticipantCurrency::new(&prepare.initiating_fsp, currency));
        }

        debug!(
            commit_request_id = %prepare.commit_request_id,
            determining_transfer_id = %prepare.determining_transfer_id,
            determining_transfer_exists = exists,
            "determining transfer check"
        );

        Ok(DeterminingTransferCheck {
            determining_transfer_exists: exists,
            watch_list: Vec::new(),
            determining_transfer,
            participant_currency_validation_list: validation,
        })
    }

    /// Reservation target for a plain transfer PREPARE.
    ///
    /// When the payer already converted through an FXP, the FXP owes the
    /// transfer amount in the leg's target currency.
    pub async fn get_participant_and_currency_for_transfer(
        &self,
        prepare: &TransferPrepare,
        check: &DeterminingTransferCheck,
    ) -> Result<PositionParticipant, CyrilError> {
        let payer_conversion = check
            .watch_list
            .iter()
            .find(|e| e.fx_transfer_type == FxTransferType::PayerConversion);

        if let Some(entry) = payer_conversion {
            let leg = self.load_leg(entry).await?;
            if leg.state.enumeration() != StateEnumeration::Aborted {
                return Ok(PositionParticipant {
                    participant_name: leg.counter_party_fsp,
                    currency: leg.target_amount.currency,
                    amount: prepare.amount.amount,
                });
            }
        }

        Ok(PositionParticipant {
            participant_name: prepare.payer_fsp.clone(),
            currency: prepare.amount.currency.clone(),
            amount: prepare.amount.amount,
        })
    }

    /// Reservation target for an FX leg PREPARE. Registers the leg on the watch list.
    ///
    /// A leg with no determining transfer on file is a payer-side conversion
    /// and reserves the initiating FSP's source amount. Otherwise it is a
    /// payee-side conversion and reserves the FXP's target amount.
    pub async fn get_participant_and_currency_for_fx_transfer(
        &self,
        prepare: &FxTransferPrepare,
        check: &DeterminingTransferCheck,
    ) -> Result<PositionParticipant, CyrilError> {
        let (fx_transfer_type, target) = if check.determining_transfer_exists {
            (
                FxTransferType::PayeeConversion,
                PositionParticipant {
                    participant_name: prepare.counter_party_fsp.clone(),
                    currency: prepare.target_amount.currency.clone(),
                    amount: prepare.target_amount.amount,
                },
            )
        } else {
            (
                FxTransferType::PayerConversion,
                PositionParticipant {
                    participant_name: prepare.initiating_fsp.clone(),
                    currency: prepare.source_amount.currency.clone(),
                    amount: prepare.source_amount.amount,
                },
            )
        };

        let determining_transfer_id = &prepare.determining_transfer_id;
        let entries = self
            .repo
            .get_watch_list_by_determining_transfer_id(determining_transfer_id)
            .await?;

        let mut registered = false;
        for entry in &entries {
            if entry.commit_request_id == prepare.commit_request_id {
                registered = true;
                continue;
            }
            if entry.fx_transfer_type != fx_transfer_type {
                continue;
            }
            let other = self.load_leg(entry).await?;
            if other.state.enumeration() != StateEnumeration::Aborted {
                return Err(CyrilError::UnsupportedTopology(
                    determining_transfer_id.clone(),
                    fx_transfer_type,
                ));
            }
        }

        if !registered {
            self.repo
                .add_to_watch_list(
                    determining_transfer_id,
                    &prepare.commit_request_id,
                    fx_transfer_type,
                )
                .await?;
            info!(
                commit_request_id = %prepare.commit_request_id,
                determining_transfer_id = %determining_transfer_id,
                fx_transfer_type = %fx_transfer_type,
                "fx leg added to watch list"
            );
        }

        Ok(target)
    }

    /// Watch list entries for a determining transfer.
    pub async fn get_watch_list(
        &self,
        determining_transfer_id: &TransferId,
    ) -> Result<Vec<WatchListEntry>, CyrilError> {
        Ok(self
            .repo
            .get_watch_list_by_determining_transfer_id(determining_transfer_id)
            .await?)
    }
}
