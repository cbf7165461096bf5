//! Terminal walkthrough of a confidential payroll stream.
//!
//! An employer mints, opens a stream to an employee, the employee withdraws
//! twice, the employer stops the stream, and both parties read their
//! balances back through reencryption. An outsider's attempt to read a
//! balance is refused.
//!
//! Run with:
//!   cargo run -p veilstream-contracts --example payroll

use std::sync::Arc;

use veilstream_contracts::{CallContext, ConfidentialStreamToken, ContractError};
use veilstream_protocol::config::TokenConfig;
use veilstream_protocol::crypto::{AccountKeypair, ReencryptionKeypair};
use veilstream_protocol::fhe::{CleartextCoprocessor, Handle, InputBinding};
use veilstream_protocol::gateway::{open_reencrypted, DecryptionResult, LocalOracle, ReencryptRequest};
use veilstream_protocol::Address;

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn section(num: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}[{num}] {title}{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn refused(text: &str) {
    println!("{RED}  [REFUSED] {text}{RESET}");
}

fn info(label: &str, value: impl std::fmt::Display) {
    println!("  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

type Token = ConfidentialStreamToken<CleartextCoprocessor>;

/// Ask for `handle` reencrypted to `who`, run the oracle, open the box.
fn reveal(
    token: &mut Token,
    oracle: &LocalOracle<CleartextCoprocessor>,
    who: &AccountKeypair,
    handle: Handle,
) -> Result<u64, ContractError> {
    let session = ReencryptionKeypair::generate();
    let request = ReencryptRequest::sign(
        who,
        handle,
        token.address(),
        token.chain_id(),
        session.public_key_bytes(),
    );
    token.request_disclosure(&request)?;

    for result in oracle.fulfill_pending() {
        if let DecryptionResult::Reencrypted {
            handle,
            requester,
            sealed,
            ..
        } = result
        {
            if let Ok(value) = open_reencrypted(&session, &sealed, &handle, &requester) {
                return Ok(value);
            }
        }
    }
    Ok(0)
}

fn balance(
    token: &mut Token,
    oracle: &LocalOracle<CleartextCoprocessor>,
    who: &AccountKeypair,
) -> Result<u64, ContractError> {
    match token.balance_of(&who.address()) {
        Some(handle) => reveal(token, oracle, who, handle),
        None => Ok(0),
    }
}

fn main() -> Result<(), ContractError> {
    let coprocessor = Arc::new(CleartextCoprocessor::new());
    let oracle = Arc::new(LocalOracle::new(coprocessor.clone(), 64));
    let employer = AccountKeypair::generate();
    let employee = AccountKeypair::generate();
    let outsider = AccountKeypair::generate();

    let contract = Address::derive_contract(&employer.address(), 0);
    let mut token = Token::new(contract, &TokenConfig::default(), coprocessor.clone(), oracle.clone());
    let input = |value: u64, user: Address| {
        coprocessor.encrypt_input(value, &InputBinding { contract, user })
    };

    section(1, "Deploy and fund");
    info("contract", contract);
    info("employer", employer.address());
    info("employee", employee.address());
    token.mint(&CallContext::new(employer.address(), 0), 10_000)?;
    success("employer minted 10000 (mint amounts are public)");

    section(2, "Open a stream at 1 unit per second");
    let id = token.start_stream(&CallContext::new(employer.address(), 0), employee.address())?;
    info("stream", id);

    section(3, "Employee withdraws at t=120 and t=300");
    token.withdraw_from_stream(
        &CallContext::new(employee.address(), 120),
        id,
        &input(0, employee.address()),
    )?;
    success("withdrawal at t=120 settled");
    token.withdraw_from_stream(
        &CallContext::new(employee.address(), 300),
        id,
        &input(0, employee.address()),
    )?;
    success("withdrawal at t=300 settled");

    section(4, "Employer stops the stream at t=360");
    token.stop_stream(
        &CallContext::new(employer.address(), 360),
        id,
        &input(0, employer.address()),
    )?;
    if let Some(stream) = token.stream(id) {
        info("status", stream.status);
    }

    section(5, "Balances, read back by their owners");
    info("employer", balance(&mut token, &oracle, &employer)?);
    info("employee", balance(&mut token, &oracle, &employee)?);
    info("total supply", token.total_supply());

    section(6, "An outsider tries to read the employee's balance");
    if let Some(handle) = token.balance_of(&employee.address()) {
        match reveal(&mut token, &oracle, &outsider, handle) {
            Err(err) => refused(&err.to_string()),
            Ok(value) => println!("  unexpected disclosure of {value}"),
        }
    }

    println!();
    println!("{DIM}  {} events recorded{RESET}", token.drain_events().len());
    Ok(())
}
