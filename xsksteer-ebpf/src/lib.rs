#![no_std]

// This file exists to enable the library target, which lets `xsksteer` name this crate as a
// build dependency. The program itself is `main.rs`; its classification logic lives in
// `xsksteer-common` where it is unit-tested on the host.
