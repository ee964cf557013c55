/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
#![forbid(unsafe_code)]

//! Armature Macro Library
//!
//! Procedural macros for the Armature runtime.
//!
//! # Message Macro
//!
//! [`armature_message`] turns a plain struct into a payload that can be published on a
//! channel and decoded by subscribers:
//!
//! ```ignore
//! #[armature_message]
//! pub struct LidarScan {
//!     pub frame: u64,
//!     pub ranges: Vec<f32>,
//! }
//! ```
//!
//! # Main Entry Point
//!
//! [`armature_main`] wraps an async `main` in a tokio runtime:
//!
//! ```ignore
//! use armature::prelude::*;
//!
//! #[armature_main]
//! async fn main() {
//!     let runtime = ArmatureApp::launch_async().await;
//!     // ... register modules, start descriptors
//!     runtime.shutdown_all().await;
//! }
//! ```

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, DeriveInput, ItemFn};

fn has_derive(input: &DeriveInput, trait_name: &str) -> bool {
    input.attrs.iter().any(|attr| {
        if attr.path().is_ident("derive") {
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta.path.is_ident(trait_name) {
                    found = true;
                }
                Ok(())
            });
            found
        } else {
            false
        }
    })
}

/// Derives what a channel payload type needs.
///
/// Expands to:
/// - `#[derive(Clone, Debug, Serialize, Deserialize)]` for whichever of those traits
///   are not already derived (serde paths are resolved through `::armature::serde`)
/// - an implementation of `armature::prelude::ArmatureMessage`
/// - a compile-time assertion that the type is `Send + Sync + 'static`
///
/// ```ignore
/// #[armature_message]
/// pub struct Odometry {
///     pub x: f64,
///     pub y: f64,
/// }
/// ```
#[proc_macro_attribute]
pub fn armature_message(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);

    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let need_serde_attr = !has_derive(&input, "Serialize") || !has_derive(&input, "Deserialize");

    let derives = {
        let mut traits = Vec::new();
        if !has_derive(&input, "Clone") {
            traits.push(quote!(Clone));
        }
        if !has_derive(&input, "Debug") {
            traits.push(quote!(Debug));
        }
        if !has_derive(&input, "Serialize") {
            traits.push(quote!(::armature::serde::Serialize));
        }
        if !has_derive(&input, "Deserialize") {
            traits.push(quote!(::armature::serde::Deserialize));
        }
        if traits.is_empty() {
            quote!()
        } else {
            quote!(#[derive(#(#traits),*)])
        }
    };

    let serde_crate = if need_serde_attr {
        quote!(#[serde(crate = "::armature::serde")])
    } else {
        quote!()
    };

    let assert_ident = quote::format_ident!("_AssertArmatureMessage_{}", name);

    let expanded = quote! {
        #derives
        #serde_crate
        #input

        impl #impl_generics ::armature::prelude::ArmatureMessage for #name #ty_generics #where_clause {}

        #[doc(hidden)]
        #[allow(dead_code, non_camel_case_types, non_snake_case, clippy::needless_lifetimes)]
        const _: () = {
            fn #assert_ident #impl_generics () #where_clause {
                fn assert_bounds<T: Send + Sync + 'static>() {}
                assert_bounds::<#name #ty_generics>();
            }
        };
    };

    TokenStream::from(expanded)
}

/// Entry point macro for Armature applications.
///
/// Marks an async `main` as the program entry point and builds the tokio runtime for
/// it. Accepts `flavor = "current_thread"` and `worker_threads = N`.
///
/// ```ignore
/// #[armature_main(worker_threads = 4)]
/// async fn main() { }
/// ```
#[proc_macro_attribute]
pub fn armature_main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            sig.fn_token,
            "the async keyword is missing from the function declaration",
        )
        .to_compile_error()
        .into();
    }

    if sig.ident != "main" {
        return syn::Error::new_spanned(
            &sig.ident,
            "armature_main can only be applied to the main function",
        )
        .to_compile_error()
        .into();
    }

    let attr_string = attr.to_string();
    let use_current_thread = attr_string.contains("current_thread");

    let worker_threads: Option<usize> = attr_string
        .split(',')
        .find(|s| s.contains("worker_threads"))
        .and_then(|s| s.split('=').nth(1).and_then(|v| v.trim().parse().ok()));

    let runtime_builder = if use_current_thread {
        quote! {
            ::armature::prelude::tokio::runtime::Builder::new_current_thread()
        }
    } else if let Some(threads) = worker_threads {
        quote! {
            ::armature::prelude::tokio::runtime::Builder::new_multi_thread()
                .worker_threads(#threads)
        }
    } else {
        quote! {
            ::armature::prelude::tokio::runtime::Builder::new_multi_thread()
        }
    };

    let fn_name = &sig.ident;
    let fn_inputs = &sig.inputs;
    let fn_output = &sig.output;

    let expanded = quote! {
        #(#attrs)*
        #vis fn #fn_name(#fn_inputs) #fn_output {
            #runtime_builder
                .enable_all()
                .build()
                .expect("Failed to build Armature runtime")
                .block_on(async #body)
        }
    };

    TokenStream::from(expanded)
}
