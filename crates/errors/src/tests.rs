#[cfg(test)]
mod error_tests {
    use crate::*;
    use serde_json::json;

    #[test]
    fn test_celery_error_display() {
        let transport = CeleryError::transport("connection refused");
        assert_eq!(transport.to_string(), "传输层错误: connection refused");

        let missing = CeleryError::handler_not_found("tasks.add");
        assert_eq!(missing.to_string(), "缺少任务处理器: tasks.add");

        let duplicate = CeleryError::HandlerAlreadyRegistered {
            name: "tasks.add".to_string(),
        };
        assert_eq!(duplicate.to_string(), "任务处理器已注册: tasks.add");

        let config = CeleryError::config_error("broker.url不能为空");
        assert_eq!(config.to_string(), "配置错误: broker.url不能为空");
    }

    #[test]
    fn test_task_state_error_displays_bare_status() {
        let failure = CeleryError::task_state("FAILURE", json!(null));
        assert_eq!(failure.to_string(), "FAILURE");
        assert_eq!(failure.data(), Some(&json!(null)));

        let timeout = CeleryError::task_state("TIMEOUT", json!({}));
        assert_eq!(timeout.to_string(), "TIMEOUT");
        assert!(timeout.is_client_timeout());
        assert!(!failure.is_client_timeout());
    }

    #[test]
    fn test_poison_classification() {
        assert!(CeleryError::decode("unsupported content type text/plain").is_poison());
        assert!(CeleryError::handler_not_found("tasks.unknown").is_poison());
        assert!(CeleryError::UnrecognizedEnvelope("no task".to_string()).is_poison());
        assert!(!CeleryError::transport("channel closed").is_poison());
        assert!(!CeleryError::HandlerExecution("boom".to_string()).is_poison());
    }

    #[test]
    fn test_handler_execution_message() {
        let err = CeleryError::handler_execution("division by zero");
        assert_eq!(err.to_string(), "任务执行错误: division by zero");
        assert_eq!(err.clone(), err);
        assert_eq!(err.data(), None);
    }

    #[test]
    fn test_error_conversions() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: CeleryError = json_err.into();
        assert!(matches!(err, CeleryError::Serialization(_)));

        let err: CeleryError = anyhow::anyhow!("unexpected").into();
        assert!(matches!(err, CeleryError::Internal(ref msg) if msg == "unexpected"));
    }
}
