//! Capability checks for commands.
//!
//! Grants are plain capability names. The caller must hold every capability
//! the command requires; when the bot's grants for the scope are known, the bot
//! must hold those plus any bot-only requirements. Deny wins.

use std::collections::BTreeSet;

use crate::runtime::error::{CommandError, Subject};

use super::Command;

/// Capability that satisfies every requirement.
pub const ADMINISTRATOR: &str = "administrator";

/// Required capabilities absent from `granted`, sorted.
pub fn missing<'a, I>(required: I, granted: &BTreeSet<String>) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    if granted.contains(ADMINISTRATOR) {
        return Vec::new();
    }
    let mut missing: Vec<String> = required
        .into_iter()
        .filter(|capability| !granted.contains(*capability))
        .cloned()
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

/// Check the caller and (optionally) the bot against a command.
pub fn check(
    command: &Command,
    actor: &BTreeSet<String>,
    bot: Option<&BTreeSet<String>>,
) -> Result<(), CommandError> {
    let actor_missing = missing(command.required_capabilities(), actor);
    if !actor_missing.is_empty() {
        return Err(CommandError::PermissionDenied {
            subject: Subject::Actor,
            missing: actor_missing,
        });
    }

    if let Some(bot) = bot {
        let bot_missing = missing(
            command
                .required_capabilities()
                .iter()
                .chain(command.bot_capabilities()),
            bot,
        );
        if !bot_missing.is_empty() {
            return Err(CommandError::PermissionDenied {
                subject: Subject::Bot,
                missing: bot_missing,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn caller_must_hold_requirements() {
        let command = Command::script("ban", "x").require("ban_members").require("kick_members");
        let err = check(&command, &grants(&["kick_members"]), None).unwrap_err();
        match err {
            CommandError::PermissionDenied { subject, missing } => {
                assert_eq!(subject, Subject::Actor);
                assert_eq!(missing, vec!["ban_members".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(check(&command, &grants(&["ban_members", "kick_members"]), None).is_ok());
    }

    #[test]
    fn administrator_satisfies_everything() {
        let command = Command::script("ban", "x").require("ban_members");
        assert!(check(&command, &grants(&[ADMINISTRATOR]), None).is_ok());
    }

    #[test]
    fn bot_needs_shared_and_bot_only_capabilities() {
        let command = Command::script("purge", "x")
            .require("manage_messages")
            .require_bot("read_history");
        let caller = grants(&["manage_messages"]);

        let err = check(&command, &caller, Some(&grants(&["manage_messages"]))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bot is missing required capabilities: read_history"
        );
        assert!(check(&command, &caller, Some(&grants(&["manage_messages", "read_history"]))).is_ok());
        assert!(check(&command, &caller, None).is_ok());
    }
}
