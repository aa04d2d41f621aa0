//! Read-only reminder scan. Delivery itself is external; this module
//! only decides who should hear about which contract and when.

use crate::coordinator::SettlementError;
use chrono::{Days, NaiveDate};
use stakehold_contract::ContractBook;
use stakehold_types::{end_of_day_utc, Contract, ReminderHint, SettlementHint};
use tracing::debug;

/// Reminder hints for active contracts whose target date falls within
/// `horizon_days` of `today` (exclusive of today itself). With the
/// default horizon of 1 this is the "due tomorrow" scan.
pub fn due_reminders(
    book: &ContractBook,
    today: NaiveDate,
    horizon_days: u64,
) -> Result<Vec<ReminderHint>, SettlementError> {
    let mut hints = Vec::new();
    for offset in 1..=horizon_days.max(1) {
        let Some(due) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        for contract in book.active_due_on(due)? {
            hints.push(ReminderHint {
                user: contract.owner.clone(),
                contract_id: contract.id.clone(),
                title: contract.title.clone(),
                remind_on: today,
            });
        }
    }
    debug!(count = hints.len(), %today, horizon_days, "Reminder scan complete");
    Ok(hints)
}

/// The settlement deadline for a freshly activated contract: the last
/// instant of its target date, UTC.
pub fn settlement_hint(contract: &Contract) -> SettlementHint {
    SettlementHint {
        contract_id: contract.id.clone(),
        settle_at: end_of_day_utc(contract.target_date),
    }
}

/// The day-before reminder for a freshly activated contract. `None`
/// when the target date has no predecessor (calendar edge).
pub fn activation_reminder(contract: &Contract) -> Option<ReminderHint> {
    let remind_on = contract.target_date.checked_sub_days(Days::new(1))?;
    Some(ReminderHint {
        user: contract.owner.clone(),
        contract_id: contract.id.clone(),
        title: contract.title.clone(),
        remind_on,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stakehold_contract::CreateContract;
    use stakehold_types::UserId;

    fn create(book: &ContractBook, owner: &str, title: &str, target_date: NaiveDate) {
        book.create(
            UserId::new(owner),
            CreateContract {
                title: title.to_string(),
                description: None,
                stake_ore: 2_500,
                target_date,
            },
        )
        .unwrap();
    }

    #[test]
    fn contracts_due_tomorrow_are_picked_up() {
        let book = ContractBook::new();
        let today = chrono::Utc::now().date_naive();
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap();
        let next_week = today.checked_add_days(Days::new(7)).unwrap();
        create(&book, "alice", "Morning run", tomorrow);
        create(&book, "bob", "No sugar", next_week);

        let hints = due_reminders(&book, today, 1).unwrap();

        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].user, UserId::new("alice"));
        assert_eq!(hints[0].title, "Morning run");
        assert_eq!(hints[0].remind_on, today);
    }

    #[test]
    fn wider_horizon_picks_up_later_contracts() {
        let book = ContractBook::new();
        let today = chrono::Utc::now().date_naive();
        let in_three_days = today.checked_add_days(Days::new(3)).unwrap();
        create(&book, "alice", "Morning run", in_three_days);

        assert!(due_reminders(&book, today, 1).unwrap().is_empty());
        assert_eq!(due_reminders(&book, today, 3).unwrap().len(), 1);
    }

    #[test]
    fn ended_contracts_are_skipped() {
        let book = ContractBook::new();
        let today = chrono::Utc::now().date_naive();
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap();
        create(&book, "alice", "Morning run", tomorrow);
        let contract = book.find_active(&UserId::new("alice")).unwrap().unwrap();
        book.end(&contract.id, stakehold_types::ContractOutcome::Cancelled)
            .unwrap();

        assert!(due_reminders(&book, today, 1).unwrap().is_empty());
    }

    #[test]
    fn activation_hints_cover_settlement_and_reminder() {
        let book = ContractBook::new();
        let today = chrono::Utc::now().date_naive();
        let target = today.checked_add_days(Days::new(5)).unwrap();
        create(&book, "alice", "Morning run", target);
        let contract = book.find_active(&UserId::new("alice")).unwrap().unwrap();

        let settlement = settlement_hint(&contract);
        assert_eq!(settlement.settle_at.date_naive(), target);
        assert_eq!(settlement.settle_at, contract.window_end());

        let reminder = activation_reminder(&contract).unwrap();
        assert_eq!(
            reminder.remind_on,
            target.checked_sub_days(Days::new(1)).unwrap()
        );
        assert_eq!(reminder.title, "Morning run");
    }
}
