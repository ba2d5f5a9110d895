//! Thin accessors over a decoded [`VersionedTransaction`]: instruction lookup by index,
//! full-signed check, and co-signing by slot position rather than by appending.

use solana_message::compiled_instruction::CompiledInstruction;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;

use x402_types::FacilitatorError;

pub struct DecodedTransaction {
    inner: VersionedTransaction,
}

pub struct DecodedInstruction<'a> {
    instruction: &'a CompiledInstruction,
    account_keys: &'a [Pubkey],
}

impl DecodedTransaction {
    pub fn new(inner: VersionedTransaction) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &VersionedTransaction {
        &self.inner
    }

    pub fn into_inner(self) -> VersionedTransaction {
        self.inner
    }

    pub fn instruction(&self, index: usize) -> Result<DecodedInstruction<'_>, FacilitatorError> {
        let instruction = self
            .inner
            .message
            .instructions()
            .get(index)
            .ok_or_else(|| FacilitatorError::BadEnvelope(format!("no instruction at index {index}")))?;
        Ok(DecodedInstruction { instruction, account_keys: self.inner.message.static_account_keys() })
    }

    pub fn instruction_count(&self) -> usize {
        self.inner.message.instructions().len()
    }

    pub fn is_fully_signed(&self) -> bool {
        let required = self.inner.message.header().num_required_signatures as usize;
        if self.inner.signatures.len() < required {
            return false;
        }
        self.inner.signatures[..required].iter().all(|sig| *sig != Signature::default())
    }

    /// Places the facilitator's signature at its required-signer slot rather than appending it,
    /// matching the slot the client reserved for the fee payer when it compiled the message.
    pub fn cosign(&mut self, signer: &solana_keypair::Keypair) -> Result<(), FacilitatorError> {
        let msg_bytes = self.inner.message.serialize();
        let signature =
            signer.try_sign_message(&msg_bytes).map_err(|e| FacilitatorError::SettlementError(e.to_string()))?;

        let required = self.inner.message.header().num_required_signatures as usize;
        let static_keys = self.inner.message.static_account_keys();
        let pos = static_keys[..required]
            .iter()
            .position(|k| *k == signer.pubkey())
            .ok_or_else(|| FacilitatorError::BadEnvelope("fee payer is not a required signer of this transaction".to_string()))?;

        if self.inner.signatures.len() < required {
            self.inner.signatures.resize(required, Signature::default());
        }
        self.inner.signatures[pos] = signature;
        Ok(())
    }
}

impl DecodedInstruction<'_> {
    pub fn program_id(&self) -> Pubkey {
        *self.instruction.program_id(self.account_keys)
    }

    pub fn data(&self) -> &[u8] {
        self.instruction.data.as_slice()
    }

    pub fn account(&self, index: u8) -> Result<Pubkey, FacilitatorError> {
        let account_index = self
            .instruction
            .accounts
            .get(index as usize)
            .ok_or_else(|| FacilitatorError::BadEnvelope(format!("no account at instruction operand {index}")))?;
        self.account_keys
            .get(*account_index as usize)
            .copied()
            .ok_or_else(|| FacilitatorError::BadEnvelope(format!("account index {account_index} out of range")))
    }

    /// All accounts this instruction references, in operand order.
    pub fn accounts(&self) -> impl Iterator<Item = Pubkey> + '_ {
        self.instruction.accounts.iter().filter_map(|idx| self.account_keys.get(*idx as usize).copied())
    }
}
