//! Helpers for patching page primitives
//!
//! Wrapped primitives are replaced by a `Proxy` whose apply trap is a wasm
//! closure. The original stays the proxy target, so every trap can delegate
//! to the function it displaced.

use js_sys::{Array, Function, Object, Proxy, Reflect};
use qs_core::FilterError;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// `(target, thisArg, argumentsList) -> result`
pub type ApplyTrap = dyn FnMut(Function, JsValue, Array) -> Result<JsValue, JsValue>;

/// Wrap `target` in a proxy with the given apply trap.
pub fn proxy_with_apply(target: &Function, trap: Box<ApplyTrap>) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    let trap = Closure::wrap(trap).into_js_value();
    Reflect::set(&handler, &JsValue::from_str("apply"), &trap)?;
    Ok(Proxy::new(target, &handler).into())
}

/// Replace `owner[name]` with a proxy around the current value. Nothing is
/// installed when the property is not a function.
pub fn install_apply_trap(owner: &JsValue, name: &str, trap: Box<ApplyTrap>) -> Result<(), FilterError> {
    let key = JsValue::from_str(name);
    let original = Reflect::get(owner, &key)
        .ok()
        .and_then(|value| value.dyn_into::<Function>().ok())
        .ok_or_else(|| FilterError::property(name, "not a function"))?;
    let proxied = proxy_with_apply(&original, trap).map_err(|e| FilterError::property(name, js_error_string(&e)))?;
    match Reflect::set(owner, &key, &proxied) {
        Ok(true) => Ok(()),
        Ok(false) => Err(FilterError::property(name, "assignment rejected")),
        Err(e) => Err(FilterError::property(name, js_error_string(&e))),
    }
}

/// Call the displaced original with the trap's receiver and arguments.
#[inline]
pub fn call_original(target: &Function, this: &JsValue, args: &Array) -> Result<JsValue, JsValue> {
    Reflect::apply(target, this, args)
}

/// Define a data property. A `false` from the engine is reported as failure.
pub fn define_value(
    target: &JsValue,
    key: &str,
    value: &JsValue,
    writable: bool,
    configurable: bool,
) -> Result<(), FilterError> {
    let descriptor = Object::new();
    let set = |name: &str, v: &JsValue| Reflect::set(&descriptor, &JsValue::from_str(name), v);
    let built = set("value", value)
        .and_then(|_| set("writable", &JsValue::from_bool(writable)))
        .and_then(|_| set("configurable", &JsValue::from_bool(configurable)))
        .and_then(|_| set("enumerable", &JsValue::TRUE));
    if let Err(e) = built {
        return Err(FilterError::property(key, js_error_string(&e)));
    }
    define(target, key, &descriptor)
}

/// Define an accessor that always reads `undefined` and ignores writes.
pub fn define_undefined_accessor(target: &JsValue, key: &str) -> Result<(), FilterError> {
    let getter = Closure::<dyn Fn() -> JsValue>::new(|| JsValue::UNDEFINED).into_js_value();
    let setter = Closure::<dyn Fn(JsValue)>::new(|_| {}).into_js_value();
    let descriptor = Object::new();
    let set = |name: &str, v: &JsValue| Reflect::set(&descriptor, &JsValue::from_str(name), v);
    let built = set("get", &getter)
        .and_then(|_| set("set", &setter))
        .and_then(|_| set("configurable", &JsValue::FALSE))
        .and_then(|_| set("enumerable", &JsValue::TRUE));
    if let Err(e) = built {
        return Err(FilterError::property(key, js_error_string(&e)));
    }
    define(target, key, &descriptor)
}

fn define(target: &JsValue, key: &str, descriptor: &Object) -> Result<(), FilterError> {
    let Some(object) = target.dyn_ref::<Object>() else {
        return Err(FilterError::property(key, "target is not an object"));
    };
    match Reflect::define_property(object, &JsValue::from_str(key), descriptor) {
        Ok(true) => Ok(()),
        Ok(false) => Err(FilterError::property(key, "property is non-configurable")),
        Err(e) => Err(FilterError::property(key, js_error_string(&e))),
    }
}

/// Best-effort message of a thrown value.
pub fn js_error_string(error: &JsValue) -> String {
    if let Some(text) = error.as_string() {
        return text;
    }
    Reflect::get(error, &JsValue::from_str("message"))
        .ok()
        .and_then(|message| message.as_string())
        .unwrap_or_else(|| format!("{:?}", error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_proxy_delegates_to_original() {
        let owner = Object::new();
        let add = Function::new_with_args("a, b", "return a + b");
        Reflect::set(&owner, &"add".into(), &add).unwrap();

        install_apply_trap(
            &owner,
            "add",
            Box::new(|target, this, args| {
                let sum = call_original(&target, &this, &args)?;
                Ok(JsValue::from_f64(sum.as_f64().unwrap_or(0.0) * 10.0))
            }),
        )
        .unwrap();

        let proxied: Function = Reflect::get(&owner, &"add".into()).unwrap().unchecked_into();
        let result = proxied.call2(&JsValue::NULL, &2.into(), &3.into()).unwrap();
        assert_eq!(result.as_f64(), Some(50.0));
    }

    #[wasm_bindgen_test]
    fn test_install_requires_function() {
        let owner = Object::new();
        Reflect::set(&owner, &"value".into(), &1.into()).unwrap();
        let result = install_apply_trap(&owner, "value", Box::new(|_, _, _| Ok(JsValue::UNDEFINED)));
        assert!(matches!(result, Err(FilterError::PropertyDefine { .. })));
    }

    #[wasm_bindgen_test]
    fn test_define_value_on_frozen_object_fails() {
        let owner = Object::new();
        Object::freeze(&owner);
        let result = define_value(&owner, "google_ad_status", &1.into(), false, false);
        assert!(matches!(result, Err(FilterError::PropertyDefine { .. })));
    }

    #[wasm_bindgen_test]
    fn test_undefined_accessor_ignores_writes() {
        let owner = Object::new();
        define_undefined_accessor(&owner, "adSlots").unwrap();
        Reflect::set(&owner, &"adSlots".into(), &Array::new()).unwrap();
        assert!(Reflect::get(&owner, &"adSlots".into()).unwrap().is_undefined());
    }

    #[wasm_bindgen_test]
    fn test_js_error_string() {
        assert_eq!(js_error_string(&JsValue::from_str("boom")), "boom");
        let error = js_sys::Error::new("bad selector");
        assert_eq!(js_error_string(&error.into()), "bad selector");
    }
}
