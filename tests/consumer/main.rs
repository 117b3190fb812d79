#![cfg(unix)]

mod branching;
mod interruption;
