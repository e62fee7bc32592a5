use std::str::FromStr;

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, FuncId, Linkage, Module};
use target_lexicon::Triple;

use crate::error::BackendError;
use crate::model::ElementType;
use crate::runtime::trampolines;

/// Cranelift optimization level.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Settings passed through to the code generator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendSettings {
    pub opt_level: OptLevel,
    /// Target triple; `None` selects the host.
    pub target_triple: Option<String>,
    /// Run the Cranelift IR verifier on every function.
    pub verify: bool,
}

/// Runtime entry points callable from generated code, one per element type.
#[derive(Copy, Clone, Debug)]
pub struct RuntimeImports {
    pub invoke_input: [FuncId; 5],
    pub invoke_output: [FuncId; 5],
    pub lag_notification: FuncId,
}

/// A JIT module set up with the runtime symbols generated code links against.
pub struct Backend {
    pub module: JITModule,
    pub imports: RuntimeImports,
    pub pointer_type: Type,
}

impl Backend {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let mut flag_builder = settings::builder();
        let flags = [
            ("use_colocated_libcalls", "false"),
            ("is_pic", "false"),
            ("opt_level", settings.opt_level.as_setting()),
            ("enable_verifier", if settings.verify { "true" } else { "false" }),
        ];
        for (name, value) in flags {
            flag_builder
                .set(name, value)
                .map_err(|e| BackendError::Settings(format!("{name}={value}: {e}")))?;
        }

        let isa_builder = match &settings.target_triple {
            None => cranelift_native::builder().map_err(|e| BackendError::Isa(e.to_string()))?,
            Some(triple) => {
                let parsed = Triple::from_str(triple)
                    .map_err(|e| BackendError::Isa(format!("{triple}: {e}")))?;
                // Generated code runs in this process.
                if parsed != Triple::host() {
                    return Err(BackendError::UnsupportedTarget(triple.clone()));
                }
                isa::lookup(parsed).map_err(|e| BackendError::Isa(e.to_string()))?
            }
        };
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| BackendError::Isa(e.to_string()))?;

        let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
        for element in ElementType::ALL {
            builder.symbol(
                input_symbol(element),
                trampolines::invoke_input_ptr(element),
            );
            builder.symbol(
                output_symbol(element),
                trampolines::invoke_output_ptr(element),
            );
        }
        builder.symbol(LAG_SYMBOL, trampolines::lag_notification_ptr());

        let mut module = JITModule::new(builder);
        let pointer_type = module.target_config().pointer_type();
        let imports = declare_imports(&mut module, pointer_type)?;

        Ok(Self {
            module,
            imports,
            pointer_type,
        })
    }

    pub fn into_module(self) -> JITModule {
        self.module
    }
}

const LAG_SYMBOL: &str = "mapjit_lag_notification";

fn input_symbol(element: ElementType) -> String {
    format!("mapjit_invoke_input_{}", element.name())
}

fn output_symbol(element: ElementType) -> String {
    format!("mapjit_invoke_output_{}", element.name())
}

fn declare_imports(
    module: &mut JITModule,
    pointer_type: Type,
) -> Result<RuntimeImports, BackendError> {
    // fn(registry, buffer, len) -> has_new_data
    let mut input_sig = module.make_signature();
    input_sig.params.push(AbiParam::new(pointer_type));
    input_sig.params.push(AbiParam::new(pointer_type));
    input_sig.params.push(AbiParam::new(pointer_type));
    input_sig.returns.push(AbiParam::new(types::I8));

    // fn(registry, buffer, len)
    let mut output_sig = module.make_signature();
    output_sig.params.push(AbiParam::new(pointer_type));
    output_sig.params.push(AbiParam::new(pointer_type));
    output_sig.params.push(AbiParam::new(pointer_type));

    // fn(registry, lag)
    let mut lag_sig = module.make_signature();
    lag_sig.params.push(AbiParam::new(pointer_type));
    lag_sig.params.push(AbiParam::new(types::F64));

    let mut invoke_input = Vec::with_capacity(ElementType::ALL.len());
    let mut invoke_output = Vec::with_capacity(ElementType::ALL.len());
    for element in ElementType::ALL {
        invoke_input.push(module.declare_function(
            &input_symbol(element),
            Linkage::Import,
            &input_sig,
        )?);
        invoke_output.push(module.declare_function(
            &output_symbol(element),
            Linkage::Import,
            &output_sig,
        )?);
    }
    let lag_notification = module.declare_function(LAG_SYMBOL, Linkage::Import, &lag_sig)?;

    Ok(RuntimeImports {
        invoke_input: [
            invoke_input[0],
            invoke_input[1],
            invoke_input[2],
            invoke_input[3],
            invoke_input[4],
        ],
        invoke_output: [
            invoke_output[0],
            invoke_output[1],
            invoke_output[2],
            invoke_output[3],
            invoke_output[4],
        ],
        lag_notification,
    })
}
