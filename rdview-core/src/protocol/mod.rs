//! Gateway display protocol: instructions, codec, and status codes.

pub mod instruction;
pub mod status;

pub use instruction::{Instruction, InstructionCodec, MAX_INSTRUCTION_SIZE};
pub use status::Status;
