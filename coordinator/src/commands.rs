//! Line-oriented command surface.
//!
//! One JSON object per request, tagged by `command`. Every request gets exactly
//! one [`Reply`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sagaledger_common::{
    AccountId, ErrorKind, ParticipantId, RejectionReason, Result, SagaError, TransactionId, TransferId,
};

use crate::coordinator::Coordinator;
use crate::transaction_mediator::ParticipantRef;

/// A request read from the command stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    CreateAccount {
        account: AccountId,
    },
    Deposit {
        account: AccountId,
        amount: Decimal,
        transaction_id: TransactionId,
    },
    Withdraw {
        account: AccountId,
        amount: Decimal,
        transaction_id: TransactionId,
    },
    Execute {
        account: AccountId,
        transaction_id: TransactionId,
    },
    Cancel {
        account: AccountId,
        transaction_id: TransactionId,
    },
    Complete {
        account: AccountId,
        transaction_id: TransactionId,
    },
    AccountStatus {
        account: AccountId,
    },
    CreateTransaction {
        transaction_id: TransactionId,
        participants: Vec<ParticipantRef>,
    },
    Join {
        transaction_id: TransactionId,
        participant: ParticipantId,
    },
    Executed {
        transaction_id: TransactionId,
        participant: ParticipantId,
    },
    CancelTransaction {
        transaction_id: TransactionId,
    },
    TransactionStatus {
        transaction_id: TransactionId,
    },
    /// Omitting `transfer_id` generates one.
    StartTransfer {
        #[serde(default)]
        transfer_id: Option<TransferId>,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    },
    CompleteTransfer {
        transfer_id: TransferId,
    },
    TransferStatus {
        transfer_id: TransferId,
    },
    WalletDeposit {
        account: AccountId,
        amount: Decimal,
        #[serde(default)]
        transaction_id: Option<TransactionId>,
    },
    WalletWithdraw {
        account: AccountId,
        amount: Decimal,
        #[serde(default)]
        transaction_id: Option<TransactionId>,
    },
    DirectTransfer {
        #[serde(default)]
        transaction_id: Option<TransactionId>,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
    },
    /// Wait for in-flight work to settle.
    Drain,
    Metrics,
}

impl Command {
    /// Reject malformed account ids before anything reaches an entity.
    fn validate(&self) -> Result<()> {
        match self {
            Command::CreateAccount { account }
            | Command::Deposit { account, .. }
            | Command::Withdraw { account, .. }
            | Command::Execute { account, .. }
            | Command::Cancel { account, .. }
            | Command::Complete { account, .. }
            | Command::AccountStatus { account }
            | Command::WalletDeposit { account, .. }
            | Command::WalletWithdraw { account, .. } => account.validate(),
            Command::StartTransfer { from, to, .. } | Command::DirectTransfer { from, to, .. } => {
                from.validate()?;
                to.validate()
            }
            Command::CreateTransaction { participants, .. } => participants
                .iter()
                .try_for_each(|p| AccountId::from(&p.id).validate()),
            Command::Join { participant, .. } | Command::Executed { participant, .. } => {
                AccountId::from(participant).validate()
            }
            Command::CancelTransaction { .. }
            | Command::TransactionStatus { .. }
            | Command::CompleteTransfer { .. }
            | Command::TransferStatus { .. }
            | Command::Drain
            | Command::Metrics => Ok(()),
        }
    }
}

/// Reply written for each request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RejectionReason>,
}

impl Reply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &SagaError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(RejectionReason::from(error)),
        }
    }

    /// Reply to a line that did not parse.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(RejectionReason {
                code: "MALFORMED_REQUEST".to_string(),
                kind: ErrorKind::Validation,
                message: message.into(),
            }),
        }
    }
}

/// Parse one request line.
pub fn parse(line: &str) -> std::result::Result<Command, serde_json::Error> {
    serde_json::from_str(line)
}

/// Run one command against the coordinator.
pub async fn run(coordinator: &Coordinator, command: Command) -> Reply {
    match execute(coordinator, command).await {
        Ok(result) => Reply::success(result),
        Err(e) => Reply::failure(&e),
    }
}

async fn execute(coordinator: &Coordinator, command: Command) -> Result<Value> {
    command.validate()?;
    let value = match command {
        Command::CreateAccount { account } => to_value(coordinator.create_account(&account).await?),
        Command::Deposit {
            account,
            amount,
            transaction_id,
        } => to_value(coordinator.deposit(&account, amount, &transaction_id).await?),
        Command::Withdraw {
            account,
            amount,
            transaction_id,
        } => to_value(coordinator.withdraw(&account, amount, &transaction_id).await?),
        Command::Execute {
            account,
            transaction_id,
        } => to_value(coordinator.execute(&account, &transaction_id).await?),
        Command::Cancel {
            account,
            transaction_id,
        } => to_value(coordinator.cancel(&account, &transaction_id).await?),
        Command::Complete {
            account,
            transaction_id,
        } => to_value(coordinator.complete(&account, &transaction_id).await?),
        Command::AccountStatus { account } => to_value(coordinator.account_status(&account).await?),
        Command::CreateTransaction {
            transaction_id,
            participants,
        } => to_value(
            coordinator
                .create_transaction(&transaction_id, participants)
                .await?,
        ),
        Command::Join {
            transaction_id,
            participant,
        } => to_value(coordinator.join(&transaction_id, &participant).await?),
        Command::Executed {
            transaction_id,
            participant,
        } => to_value(coordinator.executed(&transaction_id, &participant).await?),
        Command::CancelTransaction { transaction_id } => {
            to_value(coordinator.cancel_transaction(&transaction_id).await?)
        }
        Command::TransactionStatus { transaction_id } => {
            to_value(coordinator.transaction_status(&transaction_id).await?)
        }
        Command::StartTransfer {
            transfer_id,
            from,
            to,
            amount,
        } => {
            let transfer_id = transfer_id.unwrap_or_else(TransferId::generate);
            coordinator.start_transfer(&transfer_id, from, to, amount)?;
            serde_json::json!({ "transfer_id": transfer_id })
        }
        Command::CompleteTransfer { transfer_id } => {
            to_value(coordinator.complete_transfer(&transfer_id)?)
        }
        Command::TransferStatus { transfer_id } => {
            to_value(coordinator.transfer_status(&transfer_id)?)
        }
        Command::WalletDeposit {
            account,
            amount,
            transaction_id,
        } => {
            let transaction_id = transaction_id.unwrap_or_else(TransactionId::generate);
            to_value(
                coordinator
                    .wallet_deposit(&account, amount, &transaction_id)
                    .await?,
            )
        }
        Command::WalletWithdraw {
            account,
            amount,
            transaction_id,
        } => {
            let transaction_id = transaction_id.unwrap_or_else(TransactionId::generate);
            to_value(
                coordinator
                    .wallet_withdraw(&account, amount, &transaction_id)
                    .await?,
            )
        }
        Command::DirectTransfer {
            transaction_id,
            from,
            to,
            amount,
        } => {
            let transaction_id = transaction_id.unwrap_or_else(TransactionId::generate);
            to_value(
                coordinator
                    .direct_transfer(&transaction_id, &from, &to, amount)
                    .await?,
            )
        }
        Command::Drain => serde_json::json!({ "settled": coordinator.drain().await }),
        Command::Metrics => to_value(coordinator.metrics()),
    };
    Ok(value)
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        let command = parse(
            r#"{"command":"deposit","account":"alice","amount":"12.50","transaction_id":"t1"}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            Command::Deposit {
                account: AccountId::new("alice"),
                amount: dec!(12.50),
                transaction_id: TransactionId::new("t1"),
            }
        );

        let command = parse(
            r#"{"command":"create_transaction","transaction_id":"t1","participants":[{"id":"alice","kind":"LEDGER"}]}"#,
        )
        .unwrap();
        assert!(matches!(command, Command::CreateTransaction { participants, .. } if participants.len() == 1));

        assert!(parse(r#"{"command":"explode"}"#).is_err());
    }

    #[test]
    fn test_reply_shape() {
        let reply = Reply::failure(&SagaError::AccountNotFound(AccountId::new("ghost")));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "ACCOUNT_NOT_FOUND");
        assert!(json.get("result").is_none());

        let json = serde_json::to_value(Reply::malformed("bad line")).unwrap();
        assert_eq!(json["error"]["code"], "MALFORMED_REQUEST");
    }

    #[tokio::test]
    async fn test_run_against_coordinator() {
        let mut config = CoordinatorConfig::default();
        config.drain_timeout = Duration::from_secs(5);
        let coordinator = Coordinator::new(config, "node".to_string());
        coordinator.start().await.unwrap();

        let reply = run(
            &coordinator,
            parse(r#"{"command":"wallet_deposit","account":"alice","amount":40}"#).unwrap(),
        )
        .await;
        assert!(reply.ok);

        let reply = run(&coordinator, Command::Drain).await;
        assert_eq!(reply.result.unwrap()["settled"], true);

        let reply = run(
            &coordinator,
            Command::AccountStatus {
                account: AccountId::new("alice"),
            },
        )
        .await;
        assert_eq!(reply.result.unwrap()["balance"], "40");

        let reply = run(
            &coordinator,
            Command::AccountStatus {
                account: AccountId::new("ghost"),
            },
        )
        .await;
        assert!(!reply.ok);
        assert_eq!(reply.error.unwrap().code, "ACCOUNT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_bad_account_ids_rejected() {
        let coordinator = Coordinator::new(CoordinatorConfig::default(), "node".to_string());
        coordinator.start().await.unwrap();

        for line in [
            r#"{"command":"deposit","account":"","amount":"5","transaction_id":"t1"}"#,
            r#"{"command":"start_transfer","from":"alice","to":"bob smith","amount":"5"}"#,
            r#"{"command":"join","transaction_id":"t1","participant":"a/b"}"#,
        ] {
            let reply = run(&coordinator, parse(line).unwrap()).await;
            let error = reply.error.unwrap();
            assert_eq!(error.code, "INVALID_ACCOUNT", "{line}");
            assert_eq!(error.kind, ErrorKind::Validation);
        }

        assert_eq!(coordinator.metrics().transfers_started, 0);
        let reply = run(
            &coordinator,
            Command::AccountStatus {
                account: AccountId::new("alice"),
            },
        )
        .await;
        assert_eq!(reply.error.unwrap().code, "ACCOUNT_NOT_FOUND");
    }
}
