use std::collections::HashMap;

use serde_json::Value;

/// A callable a `task.function` request can name. The original system
/// ships serialized callables; here the callables are compiled in and
/// addressed by name, which keeps the wire format data-only.
pub type RaptorFn = fn(&Value) -> Result<Value, String>;

pub struct FunctionRegistry {
    map: HashMap<&'static str, RaptorFn>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut map: HashMap<&'static str, RaptorFn> = HashMap::new();
        map.insert("noop", |_| Ok(Value::Null));
        map.insert("echo", |args| Ok(args.clone()));
        map.insert("sum", |args| {
            let numbers = args
                .as_array()
                .ok_or_else(|| "sum expects an array".to_string())?;
            let mut total = 0.0;
            for n in numbers {
                total += n
                    .as_f64()
                    .ok_or_else(|| format!("sum expects numbers, got {n}"))?;
            }
            Ok(Value::from(total))
        });
        Self { map }
    }
}

impl FunctionRegistry {
    pub fn register(&mut self, name: &'static str, f: RaptorFn) {
        self.map.insert(name, f);
    }

    pub fn call(&self, name: &str, args: &Value) -> Result<Value, String> {
        let f = self
            .map
            .get(name)
            .ok_or_else(|| format!("unknown function `{name}`"))?;
        f(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_callable() {
        let reg = FunctionRegistry::default();
        assert_eq!(reg.call("noop", &Value::Null).unwrap(), Value::Null);
        assert_eq!(
            reg.call("sum", &serde_json::json!([1, 2, 3.5])).unwrap(),
            serde_json::json!(6.5)
        );
        assert_eq!(
            reg.call("echo", &serde_json::json!({"a": 1})).unwrap(),
            serde_json::json!({"a": 1})
        );
    }

    #[test]
    fn unknown_function_is_an_error() {
        let reg = FunctionRegistry::default();
        assert!(reg.call("transmogrify", &Value::Null).is_err());
    }

    #[test]
    fn sum_rejects_non_numbers() {
        let reg = FunctionRegistry::default();
        assert!(reg.call("sum", &serde_json::json!(["x"])).is_err());
        assert!(reg.call("sum", &serde_json::json!(1)).is_err());
    }
}
