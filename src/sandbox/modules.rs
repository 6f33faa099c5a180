//! Importable modules for sandboxed scripts
//!
//! Scripts can only reach host functionality through these modules, and only
//! through the ones named in the authorized import list. Anything else fails
//! to import.

use std::collections::BTreeMap;

use chrono::format::{Item, StrftimeItems};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Array, Dynamic, EvalAltResult, ImmutableString, Module, Shared};
use tracing::warn;

/// Names of every module the sandbox knows how to build
pub const AVAILABLE_MODULES: &[&str] = &["math", "random", "datetime", "json", "re"];

/// The set of modules a sandbox is allowed to hand out
#[derive(Clone, Default)]
pub struct ModuleCatalogue {
    modules: BTreeMap<String, Shared<Module>>,
}

impl std::fmt::Debug for ModuleCatalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCatalogue")
            .field("modules", &self.names())
            .finish()
    }
}

impl ModuleCatalogue {
    /// Build the catalogue for an authorized import list
    ///
    /// Names without a module implementation are skipped with a warning.
    pub fn authorized<S: AsRef<str>>(names: &[S]) -> Self {
        let mut modules = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            match build_module(name) {
                Some(module) => {
                    modules.insert(name.to_string(), Shared::new(module));
                }
                None => warn!(module = name, "authorized import has no sandbox module; skipping"),
            }
        }
        Self { modules }
    }

    pub fn get(&self, name: &str) -> Option<&Shared<Module>> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    /// A resolver that serves `import "name"` for authorized modules only
    pub fn resolver(&self) -> StaticModuleResolver {
        let mut resolver = StaticModuleResolver::new();
        for (name, module) in &self.modules {
            resolver.insert(name.as_str(), (**module).clone());
        }
        resolver
    }
}

fn build_module(name: &str) -> Option<Module> {
    match name {
        "math" => Some(math_module()),
        "random" => Some(random_module()),
        "datetime" => Some(datetime_module()),
        "json" => Some(json_module()),
        "re" => Some(re_module()),
        _ => None,
    }
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    let message: String = message.into();
    message.into()
}

fn math_module() -> Module {
    let mut m = Module::new();
    m.set_var("PI", std::f64::consts::PI);
    m.set_var("E", std::f64::consts::E);
    m.set_var("TAU", std::f64::consts::TAU);

    m.set_native_fn("sqrt", |x: f64| {
        if x < 0.0 {
            return Err(runtime_error("math domain error: sqrt of a negative number"));
        }
        Ok(x.sqrt())
    });
    m.set_native_fn("sqrt", |x: i64| {
        if x < 0 {
            return Err(runtime_error("math domain error: sqrt of a negative number"));
        }
        Ok((x as f64).sqrt())
    });
    m.set_native_fn("pow", |base: f64, exp: f64| Ok(base.powf(exp)));
    m.set_native_fn("pow", |base: i64, exp: i64| {
        let exp = u32::try_from(exp).map_err(|_| runtime_error("exponent must be a non-negative integer"))?;
        base.checked_pow(exp)
            .ok_or_else(|| runtime_error("integer overflow in pow"))
    });
    m.set_native_fn("abs", |x: f64| Ok(x.abs()));
    m.set_native_fn("abs", |x: i64| {
        x.checked_abs().ok_or_else(|| runtime_error("integer overflow in abs"))
    });
    m.set_native_fn("floor", |x: f64| Ok(x.floor() as i64));
    m.set_native_fn("ceil", |x: f64| Ok(x.ceil() as i64));
    m.set_native_fn("round", |x: f64| Ok(x.round() as i64));
    m.set_native_fn("ln", |x: f64| Ok(x.ln()));
    m.set_native_fn("log10", |x: f64| Ok(x.log10()));
    m.set_native_fn("exp", |x: f64| Ok(x.exp()));
    m.set_native_fn("sin", |x: f64| Ok(x.sin()));
    m.set_native_fn("cos", |x: f64| Ok(x.cos()));
    m.set_native_fn("tan", |x: f64| Ok(x.tan()));
    m.set_native_fn("gcd", |a: i64, b: i64| {
        let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
        while b != 0 {
            (a, b) = (b, a % b);
        }
        i64::try_from(a).map_err(|_| runtime_error("integer overflow in gcd"))
    });
    m.set_native_fn("factorial", |n: i64| {
        if n < 0 {
            return Err(runtime_error("factorial is not defined for negative values"));
        }
        (1..=n).try_fold(1_i64, |acc, k| acc.checked_mul(k))
            .ok_or_else(|| runtime_error("integer overflow in factorial"))
    });
    m
}

fn random_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("random", || Ok(rand::thread_rng().gen::<f64>()));
    m.set_native_fn("randint", |low: i64, high: i64| {
        if low > high {
            return Err(runtime_error(format!("empty range for randint({low}, {high})")));
        }
        Ok(rand::thread_rng().gen_range(low..=high))
    });
    m.set_native_fn("choice", |items: Array| {
        items
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| runtime_error("cannot choose from an empty array"))
    });
    m.set_native_fn("shuffle", |items: Array| {
        let mut items = items;
        items.shuffle(&mut rand::thread_rng());
        Ok(items)
    });
    m
}

fn datetime_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("now", || Ok(chrono::Local::now().to_rfc3339()));
    m.set_native_fn("today", || Ok(chrono::Local::now().format("%Y-%m-%d").to_string()));
    m.set_native_fn("timestamp", || Ok(chrono::Utc::now().timestamp()));
    m.set_native_fn("format", |pattern: ImmutableString| {
        if StrftimeItems::new(pattern.as_str()).any(|item| matches!(item, Item::Error)) {
            return Err(runtime_error(format!("invalid format string '{pattern}'")));
        }
        Ok(chrono::Local::now().format(pattern.as_str()).to_string())
    });
    m
}

fn json_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("dumps", |value: Dynamic| {
        serde_json::to_string(&value).map_err(|e| runtime_error(format!("cannot serialize value: {e}")))
    });
    m.set_native_fn("loads", |text: ImmutableString| {
        let value: serde_json::Value = serde_json::from_str(text.as_str())
            .map_err(|e| runtime_error(format!("invalid JSON: {e}")))?;
        rhai::serde::to_dynamic(value)
    });
    m
}

fn compile_pattern(pattern: &str) -> Result<Regex, Box<EvalAltResult>> {
    Regex::new(pattern).map_err(|e| runtime_error(format!("invalid pattern: {e}")))
}

fn re_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("is_match", |pattern: ImmutableString, text: ImmutableString| {
        Ok(compile_pattern(pattern.as_str())?.is_match(text.as_str()))
    });
    m.set_native_fn("find", |pattern: ImmutableString, text: ImmutableString| {
        Ok(compile_pattern(pattern.as_str())?
            .find(text.as_str())
            .map(|mat| Dynamic::from(mat.as_str().to_string()))
            .unwrap_or(Dynamic::UNIT))
    });
    m.set_native_fn("find_all", |pattern: ImmutableString, text: ImmutableString| {
        Ok(compile_pattern(pattern.as_str())?
            .find_iter(text.as_str())
            .map(|mat| Dynamic::from(mat.as_str().to_string()))
            .collect::<Array>())
    });
    m.set_native_fn(
        "replace_all",
        |pattern: ImmutableString, text: ImmutableString, replacement: ImmutableString| {
            Ok(compile_pattern(pattern.as_str())?
                .replace_all(&text, replacement.as_str())
                .into_owned())
        },
    );
    m.set_native_fn("split", |pattern: ImmutableString, text: ImmutableString| {
        Ok(compile_pattern(pattern.as_str())?
            .split(text.as_str())
            .map(|part| Dynamic::from(part.to_string()))
            .collect::<Array>())
    });
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_skips_unknown_modules() {
        let catalogue = ModuleCatalogue::authorized(&["math", "os", "json"]);
        assert_eq!(catalogue.names(), vec!["json", "math"]);
        assert!(!catalogue.contains("os"));
    }

    #[test]
    fn test_every_available_module_builds() {
        let catalogue = ModuleCatalogue::authorized(AVAILABLE_MODULES);
        assert_eq!(catalogue.names().len(), AVAILABLE_MODULES.len());
    }

    #[test]
    fn test_math_module_functions() {
        let mut engine = rhai::Engine::new();
        let catalogue = ModuleCatalogue::authorized(&["math"]);
        engine.register_static_module("math", catalogue.get("math").unwrap().clone());

        assert_eq!(engine.eval::<f64>("math::sqrt(16)").unwrap(), 4.0);
        assert_eq!(engine.eval::<i64>("math::pow(2, 10)").unwrap(), 1024);
        assert_eq!(engine.eval::<i64>("math::factorial(5)").unwrap(), 120);
        assert!(engine.eval::<f64>("math::sqrt(-1)").is_err());
    }

    #[test]
    fn test_json_module_roundtrip() {
        let mut engine = rhai::Engine::new();
        let catalogue = ModuleCatalogue::authorized(&["json"]);
        engine.register_static_module("json", catalogue.get("json").unwrap().clone());

        let n = engine
            .eval::<i64>(r#"let m = json::loads("{\"a\": 3}"); m.a"#)
            .unwrap();
        assert_eq!(n, 3);
        assert!(engine.eval::<Dynamic>(r#"json::loads("{oops")"#).is_err());
    }

    #[test]
    fn test_re_module() {
        let mut engine = rhai::Engine::new();
        let catalogue = ModuleCatalogue::authorized(&["re"]);
        engine.register_static_module("re", catalogue.get("re").unwrap().clone());

        let found = engine
            .eval::<Array>(r#"re::find_all("\\d+", "a1 b22 c333")"#)
            .unwrap();
        assert_eq!(found.len(), 3);
        assert!(engine.eval::<bool>(r#"re::is_match("(", "x")"#).is_err());
    }
}
