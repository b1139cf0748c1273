use chrono::format::StrftimeItems;
use chrono::NaiveDateTime;

pub fn time_format(dt: NaiveDateTime) -> String {
    let fmt = StrftimeItems::new("%Y-%m-%d %H:%M:%S");
    format!("{}", dt.format_with_items(fmt))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::time::time_format;

    #[test]
    fn test_time_format() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 1)
            .unwrap();
        assert_eq!(time_format(dt), "2024-03-09 07:05:01");
    }
}
