//! The trade contract: which propose transactions are acceptable
use super::error::{ValidationError, ValidationKind};
use super::party::PublicKey;
use super::trade::TradeRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Proposes a brand new trade. `signers` are the keys authorising it.
    Propose { signers: Vec<PublicKey> },
}

/// The unit the contract judges: consumed records, produced records and commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalTransaction {
    pub inputs: Vec<TradeRecord>,
    pub outputs: Vec<TradeRecord>,
    pub commands: Vec<Command>,
}

impl ProposalTransaction {
    /// A propose transaction for a single fresh record signed by `signer`.
    pub fn propose(record: &TradeRecord, signer: &PublicKey) -> Self {
        Self {
            inputs: vec![],
            outputs: vec![record.clone()],
            commands: vec![Command::Propose {
                signers: vec![*signer],
            }],
        }
    }
}

/// Checks a record proposed under `authorising_key`.
pub fn validate(record: &TradeRecord, authorising_key: &PublicKey) -> Result<(), ValidationError> {
    verify(&ProposalTransaction::propose(record, authorising_key))
}

/// Runs the contract checks in order, stopping at the first failure.
pub fn verify(tx: &ProposalTransaction) -> Result<(), ValidationError> {
    if tx.commands.len() != 1 {
        return Err(ValidationError::new(
            ValidationKind::WrongCommandCount,
            format!("Must have one command, found {}", tx.commands.len()),
        ));
    }
    let Command::Propose { signers } = &tx.commands[0];

    if !tx.inputs.is_empty() {
        return Err(ValidationError::new(
            ValidationKind::NonEmptyInputs,
            format!(
                "A proposal must not consume existing trades, found {} input(s)",
                tx.inputs.len()
            ),
        ));
    }
    let [output] = tx.outputs.as_slice() else {
        return Err(ValidationError::new(
            ValidationKind::WrongOutputCount,
            format!("Must have one output, found {}", tx.outputs.len()),
        ));
    };

    if output.bought_amount() < 0 || output.sold_amount() < 0 {
        return Err(ValidationError::new(
            ValidationKind::NegativeAmount,
            format!(
                "Amounts must not be negative (bought {} {}, sold {} {})",
                output.bought_amount(),
                output.bought_currency(),
                output.sold_amount(),
                output.sold_currency()
            ),
        ));
    }

    let initiator = output.initiator();
    if !signers.contains(initiator.owning_key()) {
        return Err(ValidationError::new(
            ValidationKind::UnauthorizedSigner,
            format!("Initiator {} must sign the proposal", initiator),
        ));
    }

    Ok(())
}
