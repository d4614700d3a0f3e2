//-
// Copyright (c) 2024, The Localmail Developers
//
// This file is part of Localmail.
//
// Localmail is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Localmail is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Localmail. If not, see <http://www.gnu.org/licenses/>.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No such message")]
    NxMessage,
    #[error("Invalid sequence set: {0:?}")]
    BadSequenceSet(String),
    #[error("Invalid search query: {0}")]
    SearchSyntax(String),
    #[error("Invalid flag: {0:?}")]
    BadFlag(String),
    #[error("Permission denied.")]
    PermissionDenied,
    #[error("No mailbox selected")]
    NoMailboxSelected,
    #[error("Mailbox is read-only")]
    MailboxReadOnly,
    #[error("Mailbox full")]
    MailboxFull,
    #[error("Mailbox storage exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] toml::de::Error),
}
