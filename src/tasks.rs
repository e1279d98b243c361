//! 内置的示例任务

use anyhow::{anyhow, bail, Result};
use celery_worker::{sync_handler, Worker};
use serde_json::{Map, Number, Value};

fn add_numbers(a: &Value, b: &Value) -> Result<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        // 溢出时退回浮点加法
        if let Some(sum) = x.checked_add(y) {
            return Ok(Value::from(sum));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => Number::from_f64(a + b)
            .map(Value::Number)
            .ok_or_else(|| anyhow!("结果不是有限数字")),
        _ => bail!("参数必须是数字: {a}, {b}"),
    }
}

fn arg<'a>(args: &'a [Value], index: usize) -> Result<&'a Value> {
    args.get(index)
        .ok_or_else(|| anyhow!("缺少第 {} 个位置参数", index + 1))
}

fn kwarg<'a>(kwargs: &'a Map<String, Value>, name: &str) -> Result<&'a Value> {
    kwargs
        .get(name)
        .ok_or_else(|| anyhow!("缺少关键字参数 {name}"))
}

/// `tasks.add(a, b)`
pub fn add(args: Vec<Value>, _kwargs: Map<String, Value>) -> Result<Value> {
    add_numbers(arg(&args, 0)?, arg(&args, 1)?)
}

/// `tasks.add_kwargs(a=.., b=..)`
pub fn add_kwargs(_args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
    add_numbers(kwarg(&kwargs, "a")?, kwarg(&kwargs, "b")?)
}

/// `tasks.add_mixed(a, b, c=..)`
pub fn add_mixed(args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
    let partial = add_numbers(arg(&args, 0)?, arg(&args, 1)?)?;
    add_numbers(&partial, kwarg(&kwargs, "c")?)
}

/// 原样返回参数：只有一个位置参数时返回它本身
pub fn echo(mut args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
    if args.len() == 1 && kwargs.is_empty() {
        return Ok(args.remove(0));
    }
    Ok(serde_json::json!({"args": args, "kwargs": kwargs}))
}

/// 注册全部示例任务
pub fn register_builtin_tasks(worker: &Worker) -> Result<()> {
    worker.register("tasks.add", sync_handler(add))?;
    worker.register("tasks.add_kwargs", sync_handler(add_kwargs))?;
    worker.register("tasks.add_mixed", sync_handler(add_mixed))?;
    worker.register("tasks.echo", sync_handler(echo))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kwargs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_add_variants() {
        assert_eq!(add(vec![json!(1), json!(2)], Map::new()).unwrap(), json!(3));
        assert_eq!(add(vec![json!(1.5), json!(2)], Map::new()).unwrap(), json!(3.5));
        assert_eq!(
            add_kwargs(vec![], kwargs(json!({"a": 4, "b": 5}))).unwrap(),
            json!(9)
        );
        assert_eq!(
            add_mixed(vec![json!(1), json!(2)], kwargs(json!({"c": 3}))).unwrap(),
            json!(6)
        );
    }

    #[test]
    fn test_add_overflow_falls_back_to_float() {
        let sum = add(vec![json!(i64::MAX), json!(1)], Map::new()).unwrap();
        assert!(sum.is_f64());
        assert_eq!(sum.as_f64(), Some(i64::MAX as f64 + 1.0));

        let sum = add(vec![json!(i64::MIN), json!(-1)], Map::new()).unwrap();
        assert_eq!(sum.as_f64(), Some(i64::MIN as f64 - 1.0));
    }

    #[test]
    fn test_bad_arguments_are_errors() {
        assert!(add(vec![json!(1)], Map::new()).is_err());
        assert!(add(vec![json!("1"), json!(2)], Map::new()).is_err());
        assert!(add_kwargs(vec![], kwargs(json!({"a": 1}))).is_err());
    }

    #[test]
    fn test_echo() {
        assert_eq!(echo(vec![json!("hi")], Map::new()).unwrap(), json!("hi"));
        assert_eq!(
            echo(vec![json!(1), json!(2)], Map::new()).unwrap(),
            json!({"args": [1, 2], "kwargs": {}})
        );
    }
}
