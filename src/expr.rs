//! Lua expressions over variants, usable as a scan predicate.
//!
//! Each expression sees the globals `variant` (with `chrom`, `pos`, `start`,
//! `stop`, `REF` and `ALT`) and `index`, the record's global position in the
//! file. A record passes when any expression returns true; evaluation stops
//! at the first one that does.

use std::sync::Arc;

use mlua::{Function, Lua, RegistryKey};
use parking_lot::Mutex;

use crate::pipeline::VariantPredicate;
use crate::variant::{register_variant, Variant};

pub struct ExpressionFilter {
    lua: Mutex<Lua>,
    expressions: Vec<RegistryKey>,
}

impl ExpressionFilter {
    pub fn new(expressions: &[String]) -> mlua::Result<Self> {
        let lua = Lua::new();
        register_variant(&lua)?;
        let expressions = expressions
            .iter()
            .map(|exp| {
                // allow a bare boolean expression
                let code = if exp.trim_start().starts_with("return ") {
                    exp.clone()
                } else {
                    format!("return {exp}")
                };
                let f = lua.load(&code).set_name(exp.as_str()).into_function()?;
                lua.create_registry_value(f)
            })
            .collect::<mlua::Result<Vec<_>>>()?;
        Ok(ExpressionFilter { lua: Mutex::new(lua), expressions })
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// True if any expression passes for this variant.
    pub fn evaluate(&self, index: u64, variant: &Variant) -> mlua::Result<bool> {
        let lua = self.lua.lock();
        lua.scope(|scope| {
            let globals = lua.globals();
            globals.raw_set("variant", scope.create_any_userdata_ref(variant)?)?;
            globals.raw_set("index", index)?;
            for key in &self.expressions {
                let f: Function = lua.registry_value(key)?;
                if f.call::<_, bool>(())? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Wrap the filter as a scan predicate. Evaluation errors are logged and
    /// the record is dropped.
    pub fn into_predicate(self) -> VariantPredicate {
        let filter = Arc::new(self);
        Arc::new(move |index, variant| match filter.evaluate(index, variant) {
            Ok(keep) => keep,
            Err(e) => {
                log::error!("error evaluating expression for {variant}: {e}");
                false
            }
        })
    }
}
