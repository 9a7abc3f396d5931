//! Submission validation.
//!
//! Pure function so it is testable without a server; each rule carries its
//! own message so clients can show a precise rejection.

use crate::error::EngineError;
use crate::wire::OrderRequest;

pub fn validate_request(req: &OrderRequest, max_slippage: f64) -> Result<(), EngineError> {
    if req.token_in.trim().is_empty() {
        return Err(EngineError::validation("tokenIn must be a non-empty string"));
    }
    if req.token_out.trim().is_empty() {
        return Err(EngineError::validation(
            "tokenOut must be a non-empty string",
        ));
    }
    if req.token_in == req.token_out {
        return Err(EngineError::validation(
            "tokenIn and tokenOut must be different",
        ));
    }
    if !req.amount.is_finite() {
        return Err(EngineError::validation("amount must be a finite number"));
    }
    if req.amount <= 0.0 {
        return Err(EngineError::validation("amount must be greater than 0"));
    }
    if let Some(slippage) = req.slippage {
        if !slippage.is_finite() {
            return Err(EngineError::validation("slippage must be a finite number"));
        }
        if slippage < 0.0 || slippage > max_slippage {
            return Err(EngineError::validation(format!(
                "slippage must be between 0 and {max_slippage}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(token_in: &str, token_out: &str, amount: f64, slippage: Option<f64>) -> OrderRequest {
        OrderRequest {
            token_in: token_in.into(),
            token_out: token_out.into(),
            amount,
            slippage,
        }
    }

    #[test]
    fn accepts_a_well_formed_request() {
        assert!(validate_request(&req("SOL", "USDC", 1_000_000.0, Some(0.01)), 0.5).is_ok());
        assert!(validate_request(&req("SOL", "USDC", 1.0, None), 0.5).is_ok());
    }

    #[test]
    fn rejects_empty_tokens() {
        let err = validate_request(&req("", "USDC", 1.0, None), 0.5).unwrap_err();
        assert_eq!(err.message, "tokenIn must be a non-empty string");

        let err = validate_request(&req("SOL", "  ", 1.0, None), 0.5).unwrap_err();
        assert_eq!(err.message, "tokenOut must be a non-empty string");
    }

    #[test]
    fn rejects_identical_tokens() {
        let err = validate_request(&req("A", "A", 100.0, None), 0.5).unwrap_err();
        assert_eq!(err.message, "tokenIn and tokenOut must be different");
        assert!(!err.is_retryable());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let err = validate_request(&req("A", "B", 0.0, None), 0.5).unwrap_err();
        assert_eq!(err.message, "amount must be greater than 0");

        let err = validate_request(&req("A", "B", -5.0, None), 0.5).unwrap_err();
        assert_eq!(err.message, "amount must be greater than 0");

        let err = validate_request(&req("A", "B", f64::NAN, None), 0.5).unwrap_err();
        assert_eq!(err.message, "amount must be a finite number");
    }

    #[test]
    fn rejects_out_of_range_slippage() {
        let err = validate_request(&req("A", "B", 1.0, Some(-0.1)), 0.5).unwrap_err();
        assert_eq!(err.message, "slippage must be between 0 and 0.5");

        let err = validate_request(&req("A", "B", 1.0, Some(0.51)), 0.5).unwrap_err();
        assert_eq!(err.message, "slippage must be between 0 and 0.5");

        // Bounds are inclusive.
        assert!(validate_request(&req("A", "B", 1.0, Some(0.0)), 0.5).is_ok());
        assert!(validate_request(&req("A", "B", 1.0, Some(0.5)), 0.5).is_ok());
    }
}
