// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `/session` — manage sessions and bookmarks: `new [name]`, `label <name>`,
//! `branch <name>`.

use crate::commands::{
    CommandArgument, CommandContext, CommandResult, CompletionItem, ImmediateAction, SessionAction,
    SlashCommand,
};

static SUBCOMMANDS: &[(&str, &str)] = &[
    ("new", "Start a new, empty session"),
    ("label", "Bookmark the current leaf message"),
    ("branch", "Rewind to a bookmarked leaf"),
];

pub struct SessionCommand;

impl SlashCommand for SessionCommand {
    fn name(&self) -> &str {
        "session"
    }

    fn description(&self) -> &str {
        "Manage sessions: new [name] | label <name> | branch <name>"
    }

    fn arguments(&self) -> Vec<CommandArgument> {
        vec![
            CommandArgument::required("subcommand", "new, label, or branch"),
            CommandArgument::optional("name", "Session or bookmark name"),
        ]
    }

    fn complete(
        &self,
        arg_index: usize,
        partial: &str,
        _ctx: &CommandContext,
    ) -> Vec<CompletionItem> {
        if arg_index != 0 {
            return vec![];
        }
        let items: Vec<CompletionItem> = SUBCOMMANDS
            .iter()
            .map(|(name, desc)| CompletionItem::with_desc(*name, *name, *desc))
            .collect();
        crate::commands::completion::filter_and_rank(items, partial)
    }

    fn execute(&self, args: Vec<String>) -> CommandResult {
        let mut it = args.into_iter();
        let sub = it.next().unwrap_or_default();
        let rest = it.collect::<Vec<_>>().join(" ");

        let action = match sub.as_str() {
            "new" => Some(SessionAction::New(if rest.is_empty() { None } else { Some(rest) })),
            "label" if !rest.is_empty() => Some(SessionAction::Label(rest)),
            "branch" if !rest.is_empty() => Some(SessionAction::Branch(rest)),
            _ => None,
        };

        CommandResult {
            immediate_action: action.map(ImmediateAction::Session),
            ..Default::default()
        }
    }
}
