mod to_raw_amount;
mod token_lookup;

pub use to_raw_amount::{to_raw_amount, ToRawAmountTool};
pub use token_lookup::{TokenInfo, TokenLookupTool, TokenTable};
