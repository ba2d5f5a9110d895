//! SPL token `transferChecked` settlement on Solana (C5), with the facilitator sponsoring the
//! fee and, when needed, the destination associated token account (C9).
//!
//! The client is expected to have already compiled and partially signed a versioned
//! transaction naming the facilitator as fee payer: index 0 sets the compute unit limit,
//! index 1 sets the compute unit price, index 2 is the `transferChecked` instruction, and any
//! further instructions are validated against an allow/block list (third-party wallets such as
//! Phantom inject a guard instruction here). `settle` verifies that shape, creates the
//! recipient's associated token account first if it doesn't exist yet, co-signs at the
//! facilitator's reserved signer slot, and submits.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSignatureSubscribeConfig, RpcSimulateTransactionConfig};
use solana_client::rpc_response::RpcSignatureResult;
use solana_commitment_config::CommitmentConfig;
use solana_compute_budget_interface::ID as COMPUTE_BUDGET_PROGRAM_ID;
use solana_instruction::{AccountMeta, Instruction};
use solana_keypair::Keypair;
use solana_message::VersionedMessage;
use solana_message::v0::Message as MessageV0;
use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::instruction::TokenInstruction;
use tracing::{info, warn};

use x402_nonce_ledger::{AcquireRequest, NonceKey, NonceLedger};
use x402_types::proto::PaymentRequirements;
use x402_types::{ChainId, FacilitatorError};

use crate::config::SolanaSettlerConfig;
use crate::transaction::DecodedTransaction;

const ATA_PROGRAM_ID: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");
const SYSTEM_PROGRAM_ID: Pubkey = pubkey!("11111111111111111111111111111111");
/// Below this, the facilitator might not be able to cover the transaction fee plus the
/// ATA-creation rent deposit if one is needed. Generous relative to Solana's actual costs.
const MIN_FEE_PAYER_LAMPORTS: u64 = 5_000_000;

pub struct SolanaSettler {
    chain_id: ChainId,
    rpc_client: Arc<RpcClient>,
    pubsub_client: Option<Arc<PubsubClient>>,
    fee_payer: Arc<Keypair>,
    facilitator_id: String,
    config: SolanaSettlerConfig,
}

impl SolanaSettler {
    pub fn new(
        chain_id: ChainId,
        rpc_client: RpcClient,
        pubsub_client: Option<PubsubClient>,
        fee_payer: Keypair,
        facilitator_id: String,
        config: SolanaSettlerConfig,
    ) -> Self {
        Self {
            chain_id,
            rpc_client: Arc::new(rpc_client),
            pubsub_client: pubsub_client.map(Arc::new),
            fee_payer: Arc::new(fee_payer),
            facilitator_id,
            config,
        }
    }

    pub fn fee_payer_pubkey(&self) -> Pubkey {
        self.fee_payer.pubkey()
    }

    /// Decodes just far enough to name the transfer authority as the payer. Used by `verify`,
    /// which trusts the rest of the pre-signed payload until `settle` runs the full check.
    pub fn verify_payer(&self, requirements: &PaymentRequirements, transaction_b64: &str) -> Result<String, FacilitatorError> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, transaction_b64.trim())
            .map_err(|e| FacilitatorError::BadEnvelope(format!("transaction is not valid base64: {e}")))?;
        let versioned: VersionedTransaction =
            bincode::deserialize(&bytes).map_err(|e| FacilitatorError::BadEnvelope(format!("cannot decode transaction: {e}")))?;
        let decoded = DecodedTransaction::new(versioned);

        let asset = parse_pubkey(&requirements.asset)?;
        let pay_to = parse_pubkey(&requirements.pay_to)?;
        let amount: u64 = requirements
            .max_amount_required
            .parse()
            .map_err(|e| FacilitatorError::BadEnvelope(format!("max_amount_required is not a u64: {e}")))?;
        let transfer = verify_transfer_instruction(&decoded, asset, pay_to, amount, self.fee_payer.pubkey())?;
        Ok(transfer.authority.to_string())
    }

    pub async fn settle(
        &self,
        requirements: &PaymentRequirements,
        transaction_b64: &str,
        ledger: &dyn NonceLedger,
    ) -> Result<String, FacilitatorError> {
        let bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, transaction_b64.trim())
            .map_err(|e| FacilitatorError::BadEnvelope(format!("transaction is not valid base64: {e}")))?;
        let versioned: VersionedTransaction =
            bincode::deserialize(&bytes).map_err(|e| FacilitatorError::BadEnvelope(format!("cannot decode transaction: {e}")))?;
        let decoded = DecodedTransaction::new(versioned);

        verify_compute_limit_instruction(&decoded, self.config.max_compute_unit_limit)?;
        verify_compute_price_instruction(&decoded, self.config.max_compute_unit_price)?;
        validate_instruction_shape(&decoded, &self.config)?;

        let asset = parse_pubkey(&requirements.asset)?;
        let pay_to = parse_pubkey(&requirements.pay_to)?;
        let amount: u64 = requirements
            .max_amount_required
            .parse()
            .map_err(|e| FacilitatorError::BadEnvelope(format!("max_amount_required is not a u64: {e}")))?;

        let transfer = verify_transfer_instruction(&decoded, asset, pay_to, amount, self.fee_payer.pubkey())?;
        if self.config.require_fee_payer_not_in_instructions {
            assert_fee_payer_not_referenced(&decoded, self.fee_payer.pubkey())?;
        }

        let payer_signature = payer_signature_bytes(&decoded, transfer.authority)?;
        let key = NonceKey::new(&payer_signature, &transfer.authority.to_string(), self.chain_id.clone());
        let acquire = ledger
            .try_acquire(AcquireRequest { key: key.clone(), facilitator_id: self.facilitator_id.clone(), expires_at: 0 })
            .await;
        if !acquire.is_acquired() {
            let reason = match acquire {
                x402_nonce_ledger::AcquireOutcome::Rejected { reason } => reason,
                x402_nonce_ledger::AcquireOutcome::Acquired => unreachable!(),
            };
            return Err(FacilitatorError::DuplicateSubmission(reason));
        }

        match self.try_settle(decoded, transfer).await {
            Ok(signature) => {
                ledger.mark_settled(&key, &signature).await;
                Ok(signature)
            }
            // Already dispatched to the network: the signature is fixed regardless of outcome,
            // so a retry under a new request would just be a duplicate of this one.
            Err(err @ FacilitatorError::SettlementError(_)) => Err(err),
            Err(err) => {
                ledger.release(&key).await;
                Err(err)
            }
        }
    }

    async fn try_settle(&self, mut decoded: DecodedTransaction, transfer: TransferChecked) -> Result<String, FacilitatorError> {
        self.assert_enough_balance().await?;
        self.ensure_destination_ata(transfer.destination, transfer.mint, transfer.token_program, transfer.authority).await?;

        decoded.cosign(&self.fee_payer)?;
        if !decoded.is_fully_signed() {
            return Err(FacilitatorError::BadSignature("transaction is missing a required signature".to_string()));
        }

        let tx = decoded.into_inner();
        self.rpc_client
            .simulate_transaction_with_config(
                &tx,
                RpcSimulateTransactionConfig { sig_verify: false, replace_recent_blockhash: false, ..Default::default() },
            )
            .await
            .map_err(|e| FacilitatorError::SettlementError(format!("simulation failed: {e}")))?
            .value
            .err
            .map_or(Ok(()), |err| Err(FacilitatorError::Reverted(err.to_string())))?;

        let signature = self.send_and_confirm(&tx).await?;
        info!(signature = %signature, "transferChecked settled");
        Ok(signature.to_string())
    }

    async fn assert_enough_balance(&self) -> Result<(), FacilitatorError> {
        let balance = self
            .rpc_client
            .get_balance(&self.fee_payer.pubkey())
            .await
            .map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
        if balance < MIN_FEE_PAYER_LAMPORTS {
            return Err(FacilitatorError::InsufficientGas);
        }
        Ok(())
    }

    async fn ensure_destination_ata(
        &self,
        ata: Pubkey,
        mint: Pubkey,
        token_program: Pubkey,
        wallet: Pubkey,
    ) -> Result<(), FacilitatorError> {
        let account = self.rpc_client.get_account(&ata).await;
        if account.is_ok() {
            return Ok(());
        }

        warn!(%ata, %wallet, "destination associated token account does not exist, sponsoring creation");
        let instruction = create_associated_token_account_idempotent(self.fee_payer.pubkey(), wallet, mint, token_program);
        let (blockhash, _) = self
            .rpc_client
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
        let message = MessageV0::try_compile(&self.fee_payer.pubkey(), &[instruction], &[], blockhash)
            .map_err(|e| FacilitatorError::SettlementError(format!("cannot compile ATA-creation message: {e}")))?;
        let msg_bytes = VersionedMessage::V0(message.clone()).serialize();
        let signature =
            self.fee_payer.try_sign_message(&msg_bytes).map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
        let tx = VersionedTransaction { signatures: vec![signature], message: VersionedMessage::V0(message) };

        self.send_and_confirm(&tx).await.map(|_| ()).map_err(|e| match e {
            FacilitatorError::SettlementError(msg) => FacilitatorError::SettlementError(format!("ATA creation failed: {msg}")),
            other => other,
        })
    }

    async fn send_and_confirm(&self, tx: &VersionedTransaction) -> Result<Signature, FacilitatorError> {
        let commitment = CommitmentConfig::confirmed();
        let tx_signature = *tx.signatures.first().ok_or_else(|| FacilitatorError::SettlementError("transaction carries no signatures".to_string()))?;

        if let Some(pubsub) = self.pubsub_client.as_ref() {
            let config = RpcSignatureSubscribeConfig { commitment: Some(commitment), enable_received_notification: None };
            let (mut stream, unsubscribe) = pubsub
                .signature_subscribe(&tx_signature, Some(config))
                .await
                .map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
            if let Err(e) = self.dispatch(tx).await {
                unsubscribe().await;
                return Err(e);
            }
            match stream.next().await {
                Some(response) => {
                    let error = match response.value {
                        RpcSignatureResult::ProcessedSignature(r) => r.err,
                        _ => None,
                    };
                    unsubscribe().await;
                    match error {
                        None => Ok(tx_signature),
                        Some(err) => Err(FacilitatorError::Reverted(err.to_string())),
                    }
                }
                None => {
                    unsubscribe().await;
                    Err(FacilitatorError::SettlementError("signature subscription closed with no notification".to_string()))
                }
            }
        } else {
            self.dispatch(tx).await?;
            loop {
                let confirmed = self
                    .rpc_client
                    .confirm_transaction_with_commitment(&tx_signature, commitment)
                    .await
                    .map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;
                if confirmed.value {
                    return Ok(tx_signature);
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }

    async fn dispatch(&self, tx: &VersionedTransaction) -> Result<(), FacilitatorError> {
        self.rpc_client
            .send_transaction_with_config(tx, RpcSendTransactionConfig { skip_preflight: true, ..Default::default() })
            .await
            .map(|_| ())
            .map_err(|e| FacilitatorError::SettlementError(e.to_string()))
    }
}

struct TransferChecked {
    authority: Pubkey,
    mint: Pubkey,
    destination: Pubkey,
    token_program: Pubkey,
}

fn verify_compute_limit_instruction(tx: &DecodedTransaction, max_compute_unit_limit: u32) -> Result<(), FacilitatorError> {
    let instruction = tx.instruction(0)?;
    let data = instruction.data();
    if instruction.program_id() != COMPUTE_BUDGET_PROGRAM_ID || data.first().copied() != Some(2) || data.len() != 5 {
        return Err(FacilitatorError::BadEnvelope("instruction 0 is not SetComputeUnitLimit".to_string()));
    }
    let units = u32::from_le_bytes(data[1..5].try_into().expect("checked len above"));
    if units > max_compute_unit_limit {
        return Err(FacilitatorError::BadEnvelope("compute unit limit exceeds facilitator maximum".to_string()));
    }
    Ok(())
}

fn verify_compute_price_instruction(tx: &DecodedTransaction, max_compute_unit_price: u64) -> Result<(), FacilitatorError> {
    let instruction = tx.instruction(1)?;
    let data = instruction.data();
    if instruction.program_id() != COMPUTE_BUDGET_PROGRAM_ID || data.first().copied() != Some(3) || data.len() != 9 {
        return Err(FacilitatorError::BadEnvelope("instruction 1 is not SetComputeUnitPrice".to_string()));
    }
    let micro_lamports = u64::from_le_bytes(data[1..9].try_into().expect("checked len above"));
    if micro_lamports > max_compute_unit_price {
        return Err(FacilitatorError::BadEnvelope("compute unit price exceeds facilitator maximum".to_string()));
    }
    Ok(())
}

fn validate_instruction_shape(tx: &DecodedTransaction, config: &SolanaSettlerConfig) -> Result<(), FacilitatorError> {
    let count = tx.instruction_count();
    if count < 3 {
        return Err(FacilitatorError::BadEnvelope("transaction needs at least compute-limit, compute-price and transfer instructions".to_string()));
    }
    if count > config.max_instruction_count {
        return Err(FacilitatorError::BadEnvelope("instruction count exceeds facilitator maximum".to_string()));
    }
    if count > 3 {
        if !config.allow_additional_instructions {
            return Err(FacilitatorError::BadEnvelope("additional instructions are not allowed".to_string()));
        }
        for i in 3..count {
            let program_id = tx.instruction(i)?.program_id();
            if config.is_blocked(&program_id) {
                return Err(FacilitatorError::BadEnvelope(format!("program {program_id} is blocked")));
            }
            if !config.is_allowed(&program_id) {
                return Err(FacilitatorError::BadEnvelope(format!("program {program_id} is not in the allow list")));
            }
        }
    }
    Ok(())
}

fn verify_transfer_instruction(
    tx: &DecodedTransaction,
    expected_mint: Pubkey,
    expected_pay_to: Pubkey,
    expected_amount: u64,
    fee_payer: Pubkey,
) -> Result<TransferChecked, FacilitatorError> {
    let instruction = tx.instruction(2)?;
    let program_id = instruction.program_id();
    let token_program = if program_id == spl_token::ID {
        spl_token::ID
    } else if program_id == spl_token_2022::ID {
        spl_token_2022::ID
    } else {
        return Err(FacilitatorError::BadEnvelope("instruction 2 is not an SPL token program call".to_string()));
    };

    let amount = if token_program == spl_token::ID {
        match TokenInstruction::unpack(instruction.data()) {
            Ok(TokenInstruction::TransferChecked { amount, .. }) => amount,
            _ => return Err(FacilitatorError::BadEnvelope("instruction 2 is not transferChecked".to_string())),
        }
    } else {
        match spl_token_2022::instruction::TokenInstruction::unpack(instruction.data()) {
            Ok(spl_token_2022::instruction::TokenInstruction::TransferChecked { amount, .. }) => amount,
            _ => return Err(FacilitatorError::BadEnvelope("instruction 2 is not transferChecked".to_string())),
        }
    };
    let mint = instruction.account(1)?;
    let destination = instruction.account(2)?;
    let authority = instruction.account(3)?;

    if authority == fee_payer {
        return Err(FacilitatorError::BadEnvelope("fee payer cannot be the transfer authority".to_string()));
    }
    if mint != expected_mint {
        return Err(FacilitatorError::BadEnvelope("transferChecked mint does not match payment requirements asset".to_string()));
    }
    if amount != expected_amount {
        return Err(FacilitatorError::Insufficient);
    }

    let (expected_ata, _) =
        Pubkey::find_program_address(&[expected_pay_to.as_ref(), token_program.as_ref(), expected_mint.as_ref()], &ATA_PROGRAM_ID);
    if destination != expected_ata {
        return Err(FacilitatorError::BadEnvelope("transferChecked destination is not the recipient's associated token account".to_string()));
    }

    Ok(TransferChecked { authority, mint, destination, token_program })
}

fn assert_fee_payer_not_referenced(tx: &DecodedTransaction, fee_payer: Pubkey) -> Result<(), FacilitatorError> {
    for i in 0..tx.instruction_count() {
        if tx.instruction(i)?.accounts().any(|account| account == fee_payer) {
            return Err(FacilitatorError::BadEnvelope("fee payer must not appear in any instruction's accounts".to_string()));
        }
    }
    Ok(())
}

fn payer_signature_bytes(tx: &DecodedTransaction, payer: Pubkey) -> Result<String, FacilitatorError> {
    let required = tx.inner().message.header().num_required_signatures as usize;
    let static_keys = tx.inner().message.static_account_keys();
    let pos = static_keys[..required]
        .iter()
        .position(|k| *k == payer)
        .ok_or_else(|| FacilitatorError::BadEnvelope("transfer authority is not a required signer".to_string()))?;
    let signature = tx
        .inner()
        .signatures
        .get(pos)
        .ok_or_else(|| FacilitatorError::BadSignature("payer has not signed the transaction".to_string()))?;
    if *signature == Signature::default() {
        return Err(FacilitatorError::BadSignature("payer has not signed the transaction".to_string()));
    }
    Ok(bs58::encode(signature.as_ref()).into_string())
}

fn parse_pubkey(raw: &str) -> Result<Pubkey, FacilitatorError> {
    raw.parse().map_err(|_| FacilitatorError::BadEnvelope(format!("malformed base58 address: {raw}")))
}

/// Hand-built `CreateIdempotent` instruction for the Associated Token Account program: account
/// order is funding account, the ATA itself, the wallet it's for, the mint, the system program,
/// then the token program. Discriminant `1` selects the idempotent variant, a no-op if the
/// account already exists by the time this lands.
fn create_associated_token_account_idempotent(funding: Pubkey, wallet: Pubkey, mint: Pubkey, token_program: Pubkey) -> Instruction {
    let (ata, _) = Pubkey::find_program_address(&[wallet.as_ref(), token_program.as_ref(), mint.as_ref()], &ATA_PROGRAM_ID);
    Instruction::new_with_bytes(
        ATA_PROGRAM_ID,
        &[1u8],
        vec![
            AccountMeta::new(funding, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(wallet, false),
            AccountMeta::new_readonly(mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
            AccountMeta::new_readonly(token_program, false),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ata_instruction_targets_the_ata_program() {
        let instruction = create_associated_token_account_idempotent(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            spl_token::ID,
        );
        assert_eq!(instruction.program_id, ATA_PROGRAM_ID);
        assert_eq!(instruction.data, vec![1u8]);
        assert_eq!(instruction.accounts.len(), 6);
    }
}
