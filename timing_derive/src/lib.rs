use proc_macro::TokenStream;
use quote::quote;
use syn::{parse, parse_macro_input, DeriveInput};

#[proc_macro_derive(RegisterSerde)]
/// Derived on a packed_struct to shim in the word-level transport serde methods. The packed bytes
/// are right-aligned big-endian in the 32-bit register word.
pub fn derive_register_serde(tokens: TokenStream) -> TokenStream {
    let input = parse_macro_input!(tokens as DeriveInput);
    let block_name = input.ident;
    let generated = quote! {
        impl crate::transport::Serialize for #block_name {
            fn serialize(&self) -> Result<u32, crate::transport::Error> {
                let bytes = self.pack()?;
                Ok(bytes.iter().fold(0u32, |word, byte| (word << 8) | u32::from(*byte)))
            }
        }

        impl crate::transport::Deserialize for #block_name {
            fn deserialize(word: u32) -> Result<Self, crate::transport::Error> {
                let size = ::core::mem::size_of::<<Self as PackedStruct>::ByteArray>();
                let bytes = word.to_be_bytes();
                Ok(Self::unpack_from_slice(&bytes[bytes.len() - size..])?)
            }
        }
    };
    TokenStream::from(generated)
}

#[proc_macro_attribute]
/// Attaches the I2C sub-register address a register layout lives at
pub fn address(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr = match parse::<syn::Lit>(attr).expect("Error parsing attribute") {
        syn::Lit::Int(v) => v,
        _ => panic!("The address must be a literal integer (hopefully a u8)"),
    };
    let num = attr;
    // Get the struct name this address is for
    let item = parse_macro_input!(item as DeriveInput);
    let ident = item.clone().ident;

    let generated = quote! {
        impl crate::i2c::Address for #ident {
            const ADDR: u8 = #num as u8;
        }
        #item
    };
    TokenStream::from(generated)
}
