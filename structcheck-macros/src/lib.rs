//! structcheck Macros
//!
//! Procedural macros for bounded test execution.
//!
//! ## Macros
//!
//! - `#[structcheck::timeout(seconds)]` - Run a function body in an isolated
//!   worker process and fail if it outlives the deadline

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{ItemFn, ReturnType, parse_macro_input};

// ============================================================================
// Attribute Parsing Helpers
// ============================================================================

mod attr {
    use syn::meta::ParseNestedMeta;

    /// Get the attribute name as a string
    pub fn name(meta: &ParseNestedMeta) -> String {
        meta.path
            .get_ident()
            .map(|i| i.to_string())
            .unwrap_or_default()
    }

    /// Parse a numeric literal attribute: `attr = 1.5` or `attr = 2`
    pub fn seconds(meta: &ParseNestedMeta) -> syn::Result<f64> {
        let value: syn::Lit = meta.value()?.parse()?;
        super::lit_seconds(&value)
    }

    /// Parse a duration string attribute: `attr = "500ms"`
    pub fn duration(meta: &ParseNestedMeta) -> syn::Result<syn::LitStr> {
        meta.value()?.parse()
    }

    /// Create an unknown attribute error
    pub fn unknown(meta: &ParseNestedMeta, name: &str) -> syn::Error {
        meta.error(format!("unknown attribute: {}", name))
    }
}

/// Bound a function's execution time.
///
/// The body runs in a forked worker process. Its return value is sent back
/// and returned as usual. A panic in the body (a failed assertion) is
/// re-raised in the caller with the same message. If the body is still
/// running when the deadline passes, the worker is killed and the caller
/// panics with `test timed out after <seconds> seconds`.
///
/// `duration = ".."` strings are parsed when the function runs, by
/// `structcheck::parse_duration`, the same parser that reads
/// `structcheck.toml`. A malformed string panics with `invalid duration`.
///
/// The signature is left unchanged. The return type must implement
/// `structcheck::Relay`. The body must not spawn subprocesses, because they
/// are not killed together with the worker.
///
/// # Example
///
/// ```ignore
/// #[structcheck::timeout(1)]
/// #[test]
/// fn converges_quickly() {
///     assert!(solve().converged);
/// }
///
/// #[structcheck::timeout(seconds = 0.25)]
/// fn bounded_square(x: u64) -> u64 {
///     x * x
/// }
///
/// #[structcheck::timeout(duration = "500ms")]
/// #[test]
/// fn short() {}
///
/// // Deadline from structcheck.toml ([executor] timeout), default 60s
/// #[structcheck::timeout]
/// #[test]
/// fn configured() {}
/// ```
#[proc_macro_attribute]
pub fn timeout(args: TokenStream, item: TokenStream) -> TokenStream {
    let args = TokenStream2::from(args);
    let func = parse_macro_input!(item as ItemFn);

    timeout_impl(args, func)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

fn timeout_impl(args: TokenStream2, func: ItemFn) -> Result<TokenStream2, syn::Error> {
    validate_signature(&func)?;

    let deadline = parse_timeout_args(args)?;

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = func;

    let ret_ty = match &sig.output {
        ReturnType::Default => quote! { () },
        ReturnType::Type(_, ty) => quote! { #ty },
    };

    let executor = match deadline {
        Deadline::Seconds(secs) => {
            quote! { ::structcheck::BoundedExecutor::from_secs_f64(#secs) }
        }
        // Parsed at run time by the same function that reads structcheck.toml.
        Deadline::Duration(text) => {
            quote! { ::structcheck::BoundedExecutor::from_duration_str(#text) }
        }
        Deadline::Configured => quote! { ::structcheck::configured_executor() },
    };

    Ok(quote! {
        #(#attrs)*
        #vis #sig {
            let __structcheck_task = move || -> #ret_ty #block;
            match #executor.and_then(|__executor| __executor.run(__structcheck_task)) {
                ::core::result::Result::Ok(__value) => __value,
                ::core::result::Result::Err(__err) => __err.raise(),
            }
        }
    })
}

fn validate_signature(func: &ItemFn) -> syn::Result<()> {
    if func.sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            &func.sig.asyncness,
            "structcheck: #[timeout] cannot wrap an async fn; the body must run to completion in a worker process",
        ));
    }
    if let ReturnType::Type(_, ty) = &func.sig.output {
        if matches!(**ty, syn::Type::ImplTrait(_)) {
            return Err(syn::Error::new_spanned(
                ty,
                "structcheck: #[timeout] needs a concrete return type to send the result back",
            ));
        }
    }
    Ok(())
}

/// Deadline named by the attribute arguments
enum Deadline {
    /// `#[timeout(0.5)]` or `#[timeout(seconds = 0.5)]`
    Seconds(f64),
    /// `#[timeout(duration = "500ms")]`
    Duration(syn::LitStr),
    /// `#[timeout]`: the deadline from structcheck.toml
    Configured,
}

fn parse_timeout_args(args: TokenStream2) -> Result<Deadline, syn::Error> {
    if args.is_empty() {
        return Ok(Deadline::Configured);
    }

    // Bare form: #[timeout(0.5)]
    if let Ok(lit) = syn::parse2::<syn::Lit>(args.clone()) {
        return lit_seconds(&lit).map(Deadline::Seconds);
    }

    let mut deadline: Option<Deadline> = None;
    let parser = syn::meta::parser(|meta| {
        let name = attr::name(&meta);
        let value = match name.as_str() {
            "seconds" => Deadline::Seconds(attr::seconds(&meta)?),
            "duration" => Deadline::Duration(attr::duration(&meta)?),
            _ => return Err(attr::unknown(&meta, &name)),
        };
        if deadline.replace(value).is_some() {
            return Err(meta.error("deadline given more than once"));
        }
        Ok(())
    });

    syn::parse::Parser::parse2(parser, args)?;
    Ok(deadline.unwrap_or(Deadline::Configured))
}

fn lit_seconds(lit: &syn::Lit) -> syn::Result<f64> {
    let value = match lit {
        syn::Lit::Float(f) => f.base10_parse::<f64>()?,
        syn::Lit::Int(i) => i.base10_parse::<u64>()? as f64,
        other => {
            return Err(syn::Error::new_spanned(
                other,
                "expected a number of seconds, e.g. #[timeout(1.5)]",
            ));
        }
    };
    if !value.is_finite() || value <= 0.0 {
        return Err(syn::Error::new_spanned(
            lit,
            "timeout must be a positive number of seconds",
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds(deadline: Deadline) -> Option<f64> {
        match deadline {
            Deadline::Seconds(secs) => Some(secs),
            _ => None,
        }
    }

    #[test]
    fn test_bare_literal_args() {
        assert_eq!(seconds(parse_timeout_args(quote! { 0.5 }).unwrap()), Some(0.5));
        assert_eq!(seconds(parse_timeout_args(quote! { 2 }).unwrap()), Some(2.0));
        assert!(matches!(
            parse_timeout_args(quote! {}).unwrap(),
            Deadline::Configured
        ));
        assert!(parse_timeout_args(quote! { 0 }).is_err());
        assert!(parse_timeout_args(quote! { "fast" }).is_err());
    }

    #[test]
    fn test_named_args() {
        assert_eq!(
            seconds(parse_timeout_args(quote! { seconds = 0.25 }).unwrap()),
            Some(0.25)
        );
        match parse_timeout_args(quote! { duration = "100µs" }).unwrap() {
            Deadline::Duration(text) => assert_eq!(text.value(), "100µs"),
            _ => panic!("expected a duration string deadline"),
        }
        assert!(parse_timeout_args(quote! { duration = 5 }).is_err());
        assert!(parse_timeout_args(quote! { seconds = 1, duration = "1s" }).is_err());
        assert!(parse_timeout_args(quote! { budget = 1 }).is_err());
    }

    #[test]
    fn test_duration_is_parsed_by_shared_function() {
        let func: ItemFn = syn::parse_quote! {
            fn short() {}
        };
        let out = timeout_impl(quote! { duration = "500ms" }, func)
            .unwrap()
            .to_string();
        assert!(out.contains("from_duration_str (\"500ms\")"));
    }

    #[test]
    fn test_rejects_async() {
        let func: ItemFn = syn::parse_quote! {
            async fn slow() {}
        };
        assert!(timeout_impl(quote! { 1 }, func).is_err());
    }

    #[test]
    fn test_wraps_body_and_keeps_signature() {
        let func: ItemFn = syn::parse_quote! {
            #[test]
            pub fn doubled(x: u64) -> u64 { x * 2 }
        };
        let out = timeout_impl(quote! { 1.5 }, func).unwrap().to_string();
        assert!(out.contains("pub fn doubled (x : u64) -> u64"));
        assert!(out.contains("# [test]"));
        assert!(out.contains("from_secs_f64 (1.5"));
        assert!(out.contains("raise ()"));
    }
}
